//! Endpoint resolution, the disabled switch, and client configuration.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::MetadataCache;
use crate::error::MetadataError;
use crate::retry::RetryPolicy;
use crate::token::DEFAULT_TOKEN_TTL_SECONDS;

/// Overrides the metadata endpoint.
pub const ENDPOINT_ENV: &str = "AWS_EC2_METADATA_SERVICE_ENDPOINT";

/// Selects the default endpoint's address family (`IPv4` or `IPv6`).
pub const ENDPOINT_MODE_ENV: &str = "AWS_EC2_METADATA_SERVICE_ENDPOINT_MODE";

/// Switches metadata usage off when `true`.
pub const DISABLED_ENV: &str = "AWS_EC2_METADATA_DISABLED";

/// Default metadata service base URL (link-local IPv4 address).
pub const DEFAULT_IPV4_ENDPOINT: &str = "http://169.254.169.254";

/// Default metadata service base URL over IPv6.
pub const DEFAULT_IPV6_ENDPOINT: &str = "http://[fd00:ec2::254]";

/// Supplies the base URI of the metadata service.
pub trait EndpointProvider: Send + Sync + fmt::Debug {
    /// Base URI without a trailing slash.
    fn endpoint(&self) -> Result<String, MetadataError>;
}

/// Fixed base URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticEndpoint {
    base_url: String,
}

impl StaticEndpoint {
    /// Use `base_url`, without any trailing slash.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl EndpointProvider for StaticEndpoint {
    fn endpoint(&self) -> Result<String, MetadataError> {
        Ok(self.base_url.clone())
    }
}

/// Resolves the base URI from the process environment on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentEndpoint;

impl EnvironmentEndpoint {
    /// Resolve using `lookup` in place of the process environment.
    pub fn resolve_with<F>(lookup: F) -> Result<String, MetadataError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
            return Ok(endpoint.trim().trim_end_matches('/').to_string());
        }

        match lookup(ENDPOINT_MODE_ENV) {
            None => Ok(DEFAULT_IPV4_ENDPOINT.to_string()),
            Some(mode) if mode.eq_ignore_ascii_case("ipv4") => Ok(DEFAULT_IPV4_ENDPOINT.to_string()),
            Some(mode) if mode.eq_ignore_ascii_case("ipv6") => Ok(DEFAULT_IPV6_ENDPOINT.to_string()),
            Some(mode) => Err(MetadataError::Config(format!(
                "unknown {ENDPOINT_MODE_ENV}: {mode} (expected IPv4 or IPv6)"
            ))),
        }
    }
}

impl EndpointProvider for EnvironmentEndpoint {
    fn endpoint(&self) -> Result<String, MetadataError> {
        Self::resolve_with(|name| std::env::var(name).ok())
    }
}

/// Policy switch that turns every metadata call into `MetadataError::Disabled`.
///
/// Consulted at the top of every fetch, never cached.
#[derive(Debug, Clone, Default)]
pub enum DisabledSwitch {
    /// Read `AWS_EC2_METADATA_DISABLED` on each call.
    #[default]
    Environment,
    /// Process-controlled toggle.
    Flag(Arc<AtomicBool>),
}

impl DisabledSwitch {
    /// A toggle starting in the enabled position, plus the flag that controls it.
    pub fn flag() -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (DisabledSwitch::Flag(Arc::clone(&flag)), flag)
    }

    /// Whether metadata access is currently disabled.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::Config` if the environment variable holds
    /// something other than `true` or `false`.
    pub fn is_disabled(&self) -> Result<bool, MetadataError> {
        match self {
            DisabledSwitch::Environment => parse_bool_setting(std::env::var(DISABLED_ENV).ok()),
            DisabledSwitch::Flag(flag) => Ok(flag.load(Ordering::Acquire)),
        }
    }
}

fn parse_bool_setting(value: Option<String>) -> Result<bool, MetadataError> {
    let Some(value) = value else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" | "" => Ok(false),
        _ => Err(MetadataError::Config(format!(
            "{DISABLED_ENV} must be true or false, got {value}"
        ))),
    }
}

/// Everything a metadata client needs besides its transport.
#[derive(Debug, Clone)]
pub struct MetadataConfig {
    endpoint: Arc<dyn EndpointProvider>,
    switch: DisabledSwitch,
    retry: RetryPolicy,
    token_ttl: u32,
    cache: Arc<MetadataCache>,
}

impl Default for MetadataConfig {
    /// Environment-driven endpoint and switch, default retries, and the
    /// process-wide cache.
    fn default() -> Self {
        Self {
            endpoint: Arc::new(EnvironmentEndpoint),
            switch: DisabledSwitch::default(),
            retry: RetryPolicy::default(),
            token_ttl: DEFAULT_TOKEN_TTL_SECONDS,
            cache: MetadataCache::global(),
        }
    }
}

impl MetadataConfig {
    /// Resolve the base URI with `endpoint`.
    pub fn with_endpoint(mut self, endpoint: impl EndpointProvider + 'static) -> Self {
        self.endpoint = Arc::new(endpoint);
        self
    }

    /// Talk to a fixed base URI, e.g. a local mock server.
    pub fn with_base_url(self, base_url: &str) -> Self {
        self.with_endpoint(StaticEndpoint::new(base_url))
    }

    /// Replace the disabled switch.
    pub fn with_switch(mut self, switch: DisabledSwitch) -> Self {
        self.switch = switch;
        self
    }

    /// Replace the default attempt budget and backoff floor.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Lifetime in seconds requested for each session token.
    pub fn with_token_ttl(mut self, seconds: u32) -> Self {
        self.token_ttl = seconds;
        self
    }

    /// Use `cache` instead of the process-wide one.
    pub fn with_cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Resolve the base URI now.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::Config` if the environment names an unknown
    /// endpoint mode.
    pub fn endpoint(&self) -> Result<String, MetadataError> {
        self.endpoint.endpoint()
    }

    /// Default retry policy for fetches.
    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Requested token lifetime in seconds.
    pub fn token_ttl(&self) -> u32 {
        self.token_ttl
    }

    /// Cache shared by clients built from this config.
    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Fail with `MetadataError::Disabled` if the switch is on.
    pub fn ensure_enabled(&self) -> Result<(), MetadataError> {
        if self.switch.is_disabled()? {
            return Err(MetadataError::Disabled);
        }
        Ok(())
    }
}
