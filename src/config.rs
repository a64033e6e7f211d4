//! Configuration management for Turnstile.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then `TURNSTILE__`-prefixed environment variables
//! (e.g. `TURNSTILE__THROTTLE__LIMIT=100`). Everything is validated once at
//! load time so malformed values never reach the request path.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::throttle::{IgnoreList, Policy};

/// Upper bound accepted for any ttl, in seconds (one year).
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Global throttling configuration
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the decision service listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8090))
}

/// Global throttling defaults and request filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Requests allowed per caller and route within `ttl_secs`
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Lifetime of one admitted request's slot, in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// User-agent patterns that bypass throttling entirely
    #[serde(default)]
    pub ignore_user_agents: Vec<String>,

    /// Path to the per-group/per-operation rules file
    #[serde(default)]
    pub rules_path: Option<String>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            ttl_secs: default_ttl_secs(),
            ignore_user_agents: Vec::new(),
            rules_path: None,
        }
    }
}

fn default_limit() -> u64 {
    20
}

fn default_ttl_secs() -> u64 {
    60
}

impl ThrottleConfig {
    /// The global policy every override falls back to.
    pub fn global_policy(&self) -> Policy {
        Policy::new(self.limit, self.ttl_secs)
    }

    /// Compile the ignore patterns.
    pub fn ignore_list(&self) -> Result<IgnoreList> {
        IgnoreList::new(&self.ignore_user_agents)
    }
}

impl TurnstileConfig {
    /// Load configuration from an optional YAML file plus the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("TURNSTILE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("throttle.ignore_user_agents"),
            )
            .build()
            .map_err(|e| TurnstileError::Config(e.to_string()))?;

        let config: TurnstileConfig = settings
            .try_deserialize()
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file only, ignoring the environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail later, per request.
    pub fn validate(&self) -> Result<()> {
        validate_ttl("throttle.ttl_secs", self.throttle.ttl_secs)?;
        self.throttle.ignore_list()?;
        Ok(())
    }
}

pub(crate) fn validate_ttl(field: &str, ttl_secs: u64) -> Result<()> {
    if ttl_secs > MAX_TTL_SECS {
        return Err(TurnstileError::Config(format!(
            "{} = {} exceeds the maximum of {} seconds",
            field, ttl_secs, MAX_TTL_SECS
        )));
    }
    Ok(())
}
