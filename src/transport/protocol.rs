//! Wire format of the decision service: one JSON object per line.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::throttle::{Channel, RequestContext};

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;
pub const STATUS_INTERNAL_ERROR: u16 = 500;
pub const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

/// A request to decide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub channel: Channel,
    pub group: String,
    pub operation: String,
    /// Caller address; the connection's peer address when absent
    #[serde(default)]
    pub client_addr: Option<IpAddr>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl CheckRequest {
    /// Build the guard's view of this request.
    pub fn into_context(self, peer: Option<IpAddr>) -> RequestContext {
        RequestContext {
            channel: self.channel,
            group: self.group,
            operation: self.operation,
            client_addr: self.client_addr.or(peer),
            user_agent: self.user_agent,
        }
    }
}

/// The decision sent back for every request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub admitted: bool,
    /// HTTP-style status the caller should respond with
    pub status: u16,
    /// Headers to attach, as `[name, value]` pairs
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResponse {
    pub fn admitted(headers: Vec<(String, String)>) -> Self {
        Self {
            admitted: true,
            status: STATUS_OK,
            headers,
            error: None,
        }
    }

    pub fn rejected(status: u16, headers: Vec<(String, String)>, error: String) -> Self {
        Self {
            admitted: false,
            status,
            headers,
            error: Some(error),
        }
    }
}
