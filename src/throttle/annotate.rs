//! Translating verdicts into transport responses.
//!
//! HTTP-like channels get quota headers on every evaluated decision; skipped
//! decisions produce no headers at all. Message channels only see the
//! boolean outcome.

use std::collections::HashMap;

use super::engine::Verdict;
use crate::error::Result;

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Anything outgoing response headers can be written to.
pub trait HeaderSink {
    /// Set a header, replacing any previous value for `name`.
    fn set_header(&mut self, name: &str, value: String);
}

impl HeaderSink for Vec<(String, String)> {
    fn set_header(&mut self, name: &str, value: String) {
        match self.iter_mut().find(|(existing, _)| existing.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value,
            None => self.push((name.to_string(), value)),
        }
    }
}

impl HeaderSink for HashMap<String, String> {
    fn set_header(&mut self, name: &str, value: String) {
        self.insert(name.to_string(), value);
    }
}

/// Write quota headers for `verdict` and fail on rejection.
///
/// Returns `ThrottlingExceeded` after setting `Retry-After` when the request
/// was rejected.
pub fn annotate_http<S: HeaderSink + ?Sized>(verdict: &Verdict, sink: &mut S) -> Result<()> {
    if verdict.skipped {
        return Ok(());
    }

    sink.set_header(HEADER_LIMIT, verdict.limit.to_string());
    sink.set_header(HEADER_REMAINING, verdict.remaining.to_string());
    sink.set_header(HEADER_RESET, verdict.reset_secs.to_string());

    if !verdict.admitted {
        sink.set_header(HEADER_RETRY_AFTER, verdict.reset_secs.to_string());
    }
    verdict.into_result().map(|_| ())
}

/// Message channels carry no metadata, only the decision.
pub fn annotate_message(verdict: &Verdict) -> bool {
    verdict.admitted
}
