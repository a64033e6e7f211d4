//! Admission control: policy resolution, key derivation, slot storage and
//! verdicts.

mod annotate;
mod clock;
mod engine;
mod guard;
mod key;
mod memory;
mod policy;
mod rules;
mod store;

pub use annotate::{
    annotate_http, annotate_message, HeaderSink, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
    HEADER_RETRY_AFTER,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use engine::{Throttler, Verdict};
pub use guard::{Channel, IdentitySource, IgnoreList, RemoteAddress, RequestContext, ThrottleGuard};
pub use key::StorageKey;
pub use memory::InMemoryThrottleStore;
pub use policy::{resolve, Policy, PolicyOverride};
pub use rules::{GroupRule, RouteRules};
pub use store::{SlotUsage, ThrottleStore};
