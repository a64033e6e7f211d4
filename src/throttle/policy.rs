//! Effective policy resolution across global, group and operation scopes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The rule in force for a single admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Policy {
    /// Maximum live slots per key
    pub limit: u64,
    /// Lifetime of a slot, in seconds
    pub ttl_secs: u64,
    /// Bypass enforcement entirely
    pub skip: bool,
}

impl Policy {
    /// Create an enforcing policy.
    pub fn new(limit: u64, ttl_secs: u64) -> Self {
        Self {
            limit,
            ttl_secs,
            skip: false,
        }
    }

    /// A policy that admits everything without touching the store.
    pub fn skipped(limit: u64, ttl_secs: u64) -> Self {
        Self {
            limit,
            ttl_secs,
            skip: true,
        }
    }

    /// Slot lifetime as a `Duration`.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Optional values attached to a group or operation.
///
/// A zero or absent `limit`/`ttl_secs` means "not overridden", never
/// "limit of zero". `skip: Some(false)` explicitly re-enables throttling
/// under a skipped group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyOverride {
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub skip: Option<bool>,
}

impl PolicyOverride {
    /// Override both limit and ttl.
    pub fn limit(limit: u64, ttl_secs: u64) -> Self {
        Self {
            limit: Some(limit),
            ttl_secs: Some(ttl_secs),
            skip: None,
        }
    }

    /// Explicitly set the skip flag.
    pub fn skip(skip: bool) -> Self {
        Self {
            skip: Some(skip),
            ..Self::default()
        }
    }
}

/// Compute the effective policy for one request.
///
/// The narrowest scope that sets a value wins; limit, ttl and skip are
/// resolved independently.
pub fn resolve(
    global: &Policy,
    group: Option<&PolicyOverride>,
    operation: Option<&PolicyOverride>,
) -> Policy {
    let skip = operation
        .and_then(|o| o.skip)
        .or_else(|| group.and_then(|g| g.skip))
        .unwrap_or(global.skip);

    let limit = first_nonzero(
        operation.and_then(|o| o.limit),
        group.and_then(|g| g.limit),
    )
    .unwrap_or(global.limit);

    let ttl_secs = first_nonzero(
        operation.and_then(|o| o.ttl_secs),
        group.and_then(|g| g.ttl_secs),
    )
    .unwrap_or(global.ttl_secs);

    Policy {
        limit,
        ttl_secs,
        skip,
    }
}

fn first_nonzero(narrow: Option<u64>, wide: Option<u64>) -> Option<u64> {
    narrow
        .filter(|v| *v > 0)
        .or_else(|| wide.filter(|v| *v > 0))
}
