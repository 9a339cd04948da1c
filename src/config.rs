//! Configuration management for the portal limiter.
//!
//! Configuration is resolved once, at the process entry point, and handed to
//! components as typed values. Nothing below `main` reads the environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, ThrottleError};

/// Prefix for service environment variables (`PORTAL_LIMITER_STORE__URL`).
pub const ENV_PREFIX: &str = "PORTAL_LIMITER";
/// Well-known variable carrying the REST store endpoint.
pub const STORE_URL_ENV: &str = "UPSTASH_REDIS_REST_URL";
/// Well-known variable carrying the REST store access token.
pub const STORE_TOKEN_ENV: &str = "UPSTASH_REDIS_REST_TOKEN";

/// Main configuration for the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP gateway configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Window store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Quotas for each limiter
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the gateway listens on
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Header carrying the customer id resolved by upstream token validation
    #[serde(default = "default_customer_header")]
    pub customer_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            customer_header: default_customer_header(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_customer_header() -> String {
    "x-customer-id".to_string()
}

/// Which window store implementation backs the limiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis-compatible REST endpoint
    #[default]
    Rest,
    /// Process-local store; counters are not shared between instances
    Memory,
}

/// Window store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// REST endpoint of the shared store
    #[serde(default)]
    pub url: Option<String>,

    /// Bearer token for the REST endpoint
    #[serde(default)]
    pub token: Option<String>,

    /// Namespace prepended to every store key
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Upper bound on a single store call before the limiter fails open
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            token: None,
            prefix: default_prefix(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_prefix() -> String {
    "ratelimit".to_string()
}

fn default_timeout_ms() -> u64 {
    300
}

impl StoreConfig {
    /// Endpoint and token, if both are present and non-blank.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let url = self.url.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let token = self.token.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some((url, token))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Quotas for the portal and general API limiters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "RateLimitConfig::portal")]
    pub portal: RateLimitConfig,

    #[serde(default = "RateLimitConfig::api")]
    pub api: RateLimitConfig,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            portal: RateLimitConfig::portal(),
            api: RateLimitConfig::api(),
        }
    }
}

/// A sliding-window quota: at most `requests` admissions in any trailing
/// `window`.
///
/// Both values are validated on construction, including when deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QuotaSettings", into = "QuotaSettings")]
pub struct RateLimitConfig {
    requests: u64,
    window_secs: u64,
}

impl RateLimitConfig {
    /// Create a quota of `requests` per `window_secs` seconds.
    pub fn new(requests: u64, window_secs: u64) -> Result<Self> {
        if requests == 0 {
            return Err(ThrottleError::Config(
                "rate limit requests must be greater than zero".to_string(),
            ));
        }
        if window_secs == 0 {
            return Err(ThrottleError::Config(
                "rate limit window must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            requests,
            window_secs,
        })
    }

    /// Customer portal default: 100 requests per 60 seconds.
    pub fn portal() -> Self {
        Self {
            requests: 100,
            window_secs: 60,
        }
    }

    /// General API default: 60 requests per 60 seconds.
    pub fn api() -> Self {
        Self {
            requests: 60,
            window_secs: 60,
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub(crate) fn window_ms(&self) -> u64 {
        self.window_secs.saturating_mul(1000)
    }
}

/// Wire shape of [`RateLimitConfig`] before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QuotaSettings {
    requests: u64,
    #[serde(default = "default_window_secs")]
    window_secs: u64,
}

fn default_window_secs() -> u64 {
    60
}

impl TryFrom<QuotaSettings> for RateLimitConfig {
    type Error = ThrottleError;

    fn try_from(settings: QuotaSettings) -> Result<Self> {
        RateLimitConfig::new(settings.requests, settings.window_secs)
    }
}

impl From<RateLimitConfig> for QuotaSettings {
    fn from(config: RateLimitConfig) -> Self {
        Self {
            requests: config.requests,
            window_secs: config.window_secs,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from an optional YAML file layered under the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars().collect())
    }

    /// Load configuration from an optional YAML file layered under the given
    /// environment variables.
    ///
    /// Precedence, lowest first: defaults, file, `PORTAL_LIMITER_*`
    /// variables, then the well-known store credential variables.
    pub fn load_with_env(path: Option<&Path>, vars: HashMap<String, String>) -> Result<Self> {
        let store_url = vars.get(STORE_URL_ENV).cloned();
        let store_token = vars.get(STORE_TOKEN_ENV).cloned();

        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Yaml));
        }

        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(Some(vars.into_iter().collect()));

        let config: ServiceConfig = builder
            .add_source(environment)
            .set_override_option("store.url", store_url)?
            .set_override_option("store.token", store_token)?
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ServiceConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that deserialization alone cannot.
    pub fn validate(&self) -> Result<()> {
        if self.store.timeout_ms == 0 {
            return Err(ThrottleError::Config(
                "store timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the configuration as YAML with the store token masked.
    pub fn to_yaml_redacted(&self) -> Result<String> {
        let mut redacted = self.clone();
        if redacted.store.token.is_some() {
            redacted.store.token = Some("********".to_string());
        }
        Ok(serde_yaml::to_string(&redacted)?)
    }
}
