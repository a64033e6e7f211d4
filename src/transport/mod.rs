//! Decision service exposing the guard over TCP.
//!
//! Each connection carries newline-delimited JSON: a `CheckRequest` per line
//! in, a `CheckResponse` per line out.

mod protocol;
mod server;
mod service;

pub use protocol::{
    CheckRequest, CheckResponse, STATUS_BAD_REQUEST, STATUS_INTERNAL_ERROR, STATUS_OK,
    STATUS_SERVICE_UNAVAILABLE, STATUS_TOO_MANY_REQUESTS,
};
pub use server::TurnstileServer;
pub use service::ThrottleService;
