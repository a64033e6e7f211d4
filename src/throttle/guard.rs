//! Request-level entry point tying rules, identity and the engine together.

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use super::annotate::{annotate_http, annotate_message, HeaderSink};
use super::clock::Clock;
use super::engine::{Throttler, Verdict};
use super::key::StorageKey;
use super::policy::{resolve, Policy};
use super::rules::RouteRules;
use super::store::ThrottleStore;
use crate::config::ThrottleConfig;
use crate::error::{Result, TurnstileError};

/// Kind of transport a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Request/response with headers
    #[default]
    Http,
    /// Message-oriented, no response metadata
    Message,
}

/// What the guard needs to know about an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub channel: Channel,
    /// Resource group the target belongs to
    pub group: String,
    /// Operation within the group
    pub operation: String,
    /// Network address of the caller, when the transport knows it
    pub client_addr: Option<IpAddr>,
    /// Caller-supplied user agent
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn http(group: &str, operation: &str) -> Self {
        Self::new(Channel::Http, group, operation)
    }

    pub fn message(group: &str, operation: &str) -> Self {
        Self::new(Channel::Message, group, operation)
    }

    fn new(channel: Channel, group: &str, operation: &str) -> Self {
        Self {
            channel,
            group: group.to_string(),
            operation: operation.to_string(),
            client_addr: None,
            user_agent: None,
        }
    }

    pub fn with_client_addr(mut self, addr: IpAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }
}

/// Extracts the caller identity requests are counted under.
///
/// Closures of the right shape implement this too.
pub trait IdentitySource: Send + Sync {
    fn identity(&self, ctx: &RequestContext) -> String;
}

impl<F> IdentitySource for F
where
    F: Fn(&RequestContext) -> String + Send + Sync,
{
    fn identity(&self, ctx: &RequestContext) -> String {
        self(ctx)
    }
}

/// Identity from the caller's network address.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteAddress;

impl RemoteAddress {
    /// Shared bucket for callers whose transport supplied no address.
    pub const UNKNOWN: &'static str = "unknown";
}

impl IdentitySource for RemoteAddress {
    fn identity(&self, ctx: &RequestContext) -> String {
        ctx.client_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| Self::UNKNOWN.to_string())
    }
}

/// User-agent patterns that bypass throttling.
#[derive(Debug, Clone)]
pub struct IgnoreList {
    patterns: RegexSet,
}

impl IgnoreList {
    /// Compile the patterns, failing on the first invalid one.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = RegexSet::new(patterns.iter().map(|p| p.as_ref()))
            .map_err(|e| TurnstileError::Config(format!("Invalid ignore pattern: {}", e)))?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether the user agent matches any pattern. Missing agents never match.
    pub fn matches(&self, user_agent: Option<&str>) -> bool {
        user_agent.is_some_and(|ua| self.patterns.is_match(ua))
    }
}

impl Default for IgnoreList {
    fn default() -> Self {
        Self {
            patterns: RegexSet::empty(),
        }
    }
}

/// Decides requests end to end: ignore list, rule lookup, policy
/// resolution, key derivation, engine check and response annotation.
pub struct ThrottleGuard {
    throttler: Throttler,
    global: Policy,
    rules: RouteRules,
    ignore: IgnoreList,
    identity: Arc<dyn IdentitySource>,
}

impl ThrottleGuard {
    /// Build a guard over an in-memory store and the system clock.
    pub fn new(config: &ThrottleConfig, rules: RouteRules) -> Result<Self> {
        rules.validate()?;
        Ok(Self {
            throttler: Throttler::in_memory(),
            global: config.global_policy(),
            rules,
            ignore: config.ignore_list()?,
            identity: Arc::new(RemoteAddress),
        })
    }

    /// Swap in another store implementation.
    pub fn with_store(mut self, store: Arc<dyn ThrottleStore>) -> Self {
        self.throttler = self.throttler.with_store(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.throttler = self.throttler.with_clock(clock);
        self
    }

    /// Count requests under a custom identity instead of the caller address.
    pub fn with_identity_source<I: IdentitySource + 'static>(mut self, identity: I) -> Self {
        self.identity = Arc::new(identity);
        self
    }

    /// The effective policy for a request.
    pub fn policy_for(&self, ctx: &RequestContext) -> Policy {
        let (group, operation) = self.rules.lookup(&ctx.group, &ctx.operation);
        let mut policy = resolve(&self.global, group, operation);

        if self.ignore.matches(ctx.user_agent.as_deref()) {
            debug!(
                user_agent = ?ctx.user_agent,
                group = %ctx.group,
                operation = %ctx.operation,
                "User agent ignored"
            );
            policy.skip = true;
        }
        policy
    }

    /// Storage key for a request.
    pub fn key_for(&self, ctx: &RequestContext) -> StorageKey {
        let scope = StorageKey::scope_label(&ctx.group, &ctx.operation);
        StorageKey::derive(&self.identity.identity(ctx), &scope)
    }

    /// Decide a request without producing any transport output.
    pub async fn evaluate(&self, ctx: &RequestContext) -> Result<Verdict> {
        let policy = self.policy_for(ctx);
        let key = self.key_for(ctx);
        self.throttler.check(&key, &policy).await
    }

    /// Decide an HTTP request, writing quota headers into `sink`.
    pub async fn handle_http<S: HeaderSink + ?Sized>(
        &self,
        ctx: &RequestContext,
        sink: &mut S,
    ) -> Result<()> {
        let verdict = self.evaluate(ctx).await?;
        annotate_http(&verdict, sink)
    }

    /// Decide a message; only the boolean outcome is kept.
    pub async fn handle_message(&self, ctx: &RequestContext) -> Result<bool> {
        let verdict = self.evaluate(ctx).await?;
        Ok(annotate_message(&verdict))
    }

    /// Decide a request according to its channel.
    ///
    /// Rejections surface as `ThrottlingExceeded` on every channel; only
    /// HTTP requests get headers.
    pub async fn handle<S: HeaderSink + ?Sized>(
        &self,
        ctx: &RequestContext,
        sink: &mut S,
    ) -> Result<()> {
        match ctx.channel {
            Channel::Http => self.handle_http(ctx, sink).await,
            Channel::Message => self.evaluate(ctx).await?.into_result().map(|_| ()),
        }
    }
}
