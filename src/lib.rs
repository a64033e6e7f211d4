//! Turnstile - Request Admission Control
//!
//! This crate decides whether to admit a request based on how many requests
//! the same caller had admitted on the same route within each slot's
//! time-to-live. Policies resolve from a global default, per-group and
//! per-operation overrides; admitted requests occupy a slot in a pluggable
//! store until their ttl elapses.

pub mod config;
pub mod error;
pub mod throttle;
pub mod transport;
