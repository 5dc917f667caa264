//! Configuration management for Contagem.
//!
//! Configuration is read once at startup from an optional YAML file with
//! `CONTAGEM__`-prefixed environment variables layered on top, e.g.
//! `CONTAGEM__RATE_LIMITING__ENABLED=false`. The rate limiting section is then
//! compiled into an immutable [`RateLimitSettings`] snapshot shared by every
//! request.

use axum::http::{HeaderName, StatusCode};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ContagemError, Result};
use crate::ratelimit::{
    ClientResolver, Clock, CounterStore, FailurePolicy, MemoryCounterStore, RateLimiter,
    RuleConfig, RuleMatcher, RulesFile,
};

/// Prefix of environment variables overriding file configuration.
const ENV_PREFIX: &str = "CONTAGEM";

/// Main configuration for the Contagem service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Message echoed by the counter endpoint
    #[serde(default = "default_counter_message")]
    pub counter_message: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            counter_message: default_counter_message(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_counter_message() -> String {
    "Modelo baseado em .NET migrado para Rust".to_string()
}

/// Counter store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// In-process store; counters live as long as the process
    #[default]
    Memory,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitingConfig {
    /// Global switch for the request gate
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Header carrying the client id
    #[serde(default = "default_client_id_header")]
    pub client_id_header: String,

    /// Identity of requests without a client id
    #[serde(default = "default_anonymous_client_id")]
    pub anonymous_client_id: String,

    /// Status of quota-exceeded responses for rules that set none
    #[serde(default = "default_http_status_code")]
    pub http_status_code: u16,

    /// Behaviour when the counter store fails
    #[serde(default)]
    pub store_failure_policy: FailurePolicy,

    /// Counter store backend
    #[serde(default)]
    pub counter_store: StoreKind,

    /// Attach remaining-quota headers to allowed responses
    #[serde(default = "default_emit_headers")]
    pub emit_headers: bool,

    /// Client ids that are never limited
    #[serde(default)]
    pub client_whitelist: Vec<String>,

    /// Interval between sweeps of expired counters; 0 disables sweeping
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Ordered rules; the first matching rule applies
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,

    /// YAML file with more rules, appended after `rules`
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            client_id_header: default_client_id_header(),
            anonymous_client_id: default_anonymous_client_id(),
            http_status_code: default_http_status_code(),
            store_failure_policy: FailurePolicy::default(),
            counter_store: StoreKind::default(),
            emit_headers: default_emit_headers(),
            client_whitelist: Vec::new(),
            sweep_interval_secs: default_sweep_interval(),
            rules: default_rules(),
            rules_path: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_client_id_header() -> String {
    "X-ClientId".to_string()
}

fn default_anonymous_client_id() -> String {
    "anonymous".to_string()
}

fn default_http_status_code() -> u16 {
    429
}

fn default_emit_headers() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_rules() -> Vec<RuleConfig> {
    vec![RuleConfig::new("GET:/contador", "1m", 5)
        .with_quota_message("application/text", "Limite de requisicoes excedido!")]
}

impl ServiceConfig {
    /// Load configuration from an optional YAML file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("rate_limiting.client_whitelist"),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML string, ignoring the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

impl RateLimitingConfig {
    /// Validate the configuration into a settings snapshot.
    ///
    /// Any malformed value is an error; limiting is never silently disabled.
    pub fn compile(&self) -> Result<RateLimitSettings> {
        let client_id_header = self.client_id_header.trim();
        let header = HeaderName::from_bytes(client_id_header.as_bytes())
            .map_err(|_| {
                ContagemError::Config(format!(
                    "client_id_header '{}' is not a valid header name",
                    self.client_id_header
                ))
            })?;

        let anonymous = self.anonymous_client_id.trim();
        if anonymous.is_empty() {
            return Err(ContagemError::Config(
                "anonymous_client_id must not be empty".to_string(),
            ));
        }

        StatusCode::from_u16(self.http_status_code).map_err(|_| {
            ContagemError::Config(format!("invalid http_status_code {}", self.http_status_code))
        })?;

        let mut configs = self.rules.clone();
        if let Some(ref path) = self.rules_path {
            configs.extend(RulesFile::from_file(path)?.rules);
        }

        let rules = configs
            .iter()
            .enumerate()
            .map(|(index, rule)| rule.compile(index, self.http_status_code).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        if self.enabled && rules.is_empty() {
            warn!("Rate limiting is enabled but no rules are configured");
        }

        Ok(RateLimitSettings {
            enabled: self.enabled,
            client_id_header: client_id_header.to_string(),
            resolver: ClientResolver::new(header, anonymous),
            matcher: RuleMatcher::new(rules),
            failure_policy: self.store_failure_policy,
            counter_store: self.counter_store,
            emit_headers: self.emit_headers,
            whitelist: self.client_whitelist.clone(),
            sweep_interval: (self.sweep_interval_secs > 0)
                .then(|| Duration::from_secs(self.sweep_interval_secs)),
        })
    }
}

/// Validated, read-only rate limiting settings.
///
/// Built once at startup and shared behind an `Arc`; never mutated after.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    enabled: bool,
    /// Client id header name as configured, for documentation
    client_id_header: String,
    resolver: ClientResolver,
    matcher: RuleMatcher,
    failure_policy: FailurePolicy,
    counter_store: StoreKind,
    emit_headers: bool,
    whitelist: Vec<String>,
    sweep_interval: Option<Duration>,
}

impl RateLimitSettings {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// The client id header with the casing it was configured with.
    pub fn client_id_header(&self) -> &str {
        &self.client_id_header
    }

    pub fn resolver(&self) -> &ClientResolver {
        &self.resolver
    }

    pub fn matcher(&self) -> &RuleMatcher {
        &self.matcher
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn emit_headers(&self) -> bool {
        self.emit_headers
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval
    }

    /// Create the configured counter store.
    pub fn build_store(&self) -> Arc<dyn CounterStore> {
        match self.counter_store {
            StoreKind::Memory => Arc::new(MemoryCounterStore::new()),
        }
    }

    /// Create a rate limiter over `store` following these settings.
    pub fn build_limiter(&self, store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> RateLimiter {
        RateLimiter::new(store, clock)
            .with_failure_policy(self.failure_policy)
            .with_whitelist(self.whitelist.iter().cloned())
    }
}
