//! Decision service handling individual request lines.

use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::protocol::{
    CheckRequest, CheckResponse, STATUS_BAD_REQUEST, STATUS_INTERNAL_ERROR,
    STATUS_SERVICE_UNAVAILABLE, STATUS_TOO_MANY_REQUESTS,
};
use crate::error::TurnstileError;
use crate::throttle::ThrottleGuard;

/// Turns request lines into decisions using a shared guard.
#[derive(Clone)]
pub struct ThrottleService {
    guard: Arc<ThrottleGuard>,
}

impl ThrottleService {
    pub fn new(guard: Arc<ThrottleGuard>) -> Self {
        Self { guard }
    }

    /// Decide one request line received from `peer`.
    ///
    /// Never fails: malformed input and store outages are reported in the
    /// response with their own status codes.
    #[instrument(skip(self, line))]
    pub async fn decide(&self, line: &str, peer: Option<IpAddr>) -> CheckResponse {
        let request: CheckRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Received malformed decision request");
                return CheckResponse::rejected(
                    STATUS_BAD_REQUEST,
                    Vec::new(),
                    TurnstileError::from(e).to_string(),
                );
            }
        };

        if request.group.is_empty() || request.operation.is_empty() {
            warn!("Received decision request without group or operation");
            return CheckResponse::rejected(
                STATUS_BAD_REQUEST,
                Vec::new(),
                "group and operation are required".to_string(),
            );
        }

        let ctx = request.into_context(peer);
        let mut headers: Vec<(String, String)> = Vec::new();
        let outcome = self.guard.handle(&ctx, &mut headers).await;

        debug!(
            group = %ctx.group,
            operation = %ctx.operation,
            channel = ?ctx.channel,
            admitted = outcome.is_ok(),
            "Decision made"
        );

        match outcome {
            Ok(()) => CheckResponse::admitted(headers),
            Err(e @ TurnstileError::ThrottlingExceeded { .. }) => {
                CheckResponse::rejected(STATUS_TOO_MANY_REQUESTS, headers, e.to_string())
            }
            Err(e @ TurnstileError::StoreUnavailable(_)) => {
                CheckResponse::rejected(STATUS_SERVICE_UNAVAILABLE, Vec::new(), e.to_string())
            }
            Err(e) => CheckResponse::rejected(STATUS_INTERNAL_ERROR, Vec::new(), e.to_string()),
        }
    }
}
