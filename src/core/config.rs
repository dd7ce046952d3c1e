//! # Configuration
//!
//! Typed settings for the governance layer, sourced from environment variables.
//! Malformed values never fail startup: every field falls back to its documented
//! default, so a bad deploy-time value degrades to known-good behavior instead of
//! a crash loop.

use std::str::FromStr;
use std::time::Duration;

/// Rate limiting configuration.
///
/// The global bucket admits requests for the whole process; the per-client pair
/// is the template every lazily-created client bucket is built from.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Master switch; when false the admission middleware is a pass-through
    pub enabled: bool,

    /// Global bucket refill rate, tokens per second
    pub global_rps: f64,

    /// Global bucket capacity
    pub global_burst: u32,

    /// Per-client bucket refill rate, tokens per second
    pub client_rps: f64,

    /// Per-client bucket capacity
    pub client_burst: u32,

    /// A client entry idle longer than this is removed by the sweep
    pub cleanup_after: Duration,

    /// How often the idle sweep runs
    pub sweep_interval: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            global_rps: 200.0,
            global_burst: 100,
            client_rps: 20.0,
            client_burst: 40,
            cleanup_after: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl RateLimitSettings {
    /// Load settings from the environment, falling back to defaults field by field.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_bool("RATE_LIMIT_ENABLED", defaults.enabled),
            global_rps: env_parse("GLOBAL_RPS", defaults.global_rps),
            global_burst: env_parse("GLOBAL_BURST", defaults.global_burst),
            client_rps: env_parse("CLIENT_RPS", defaults.client_rps),
            client_burst: env_parse("CLIENT_BURST", defaults.client_burst),
            cleanup_after: Duration::from_secs(env_parse("RL_CLEANUP_MINUTES", 10u64) * 60),
            sweep_interval: defaults.sweep_interval,
        }
    }
}

/// Which backend serves the cache store contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Redis,
}

/// Response cache configuration, shared by both backends.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Master switch; a disabled store answers every lookup with a miss
    pub enabled: bool,

    /// How long a stored entry stays servable
    pub ttl: Duration,

    /// Soft cap on in-memory entry count (0 = unbounded)
    pub max_entries: usize,

    /// Largest body the store will accept, in bytes (0 = unbounded)
    pub max_bytes: usize,

    /// Backend selected once at startup
    pub backend: CacheBackend,

    /// Remote backend address
    pub redis_url: String,

    /// Upper bound on a single remote-backend operation
    pub operation_timeout: Duration,

    /// How often the in-memory expiry sweep runs
    pub sweep_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(30),
            max_entries: 10_000,
            max_bytes: 1 << 20, // 1MiB
            backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            operation_timeout: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl CacheSettings {
    /// Load settings from the environment, falling back to defaults field by field.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let backend = match env_str("CACHE_BACKEND", "memory").to_ascii_lowercase().as_str() {
            "redis" => CacheBackend::Redis,
            _ => CacheBackend::Memory,
        };
        Self {
            enabled: env_bool("CACHE_ENABLED", defaults.enabled),
            ttl: Duration::from_secs(env_parse("CACHE_TTL_SECONDS", 30u64)),
            max_entries: env_parse("CACHE_MAX_ENTRIES", defaults.max_entries),
            max_bytes: env_parse("CACHE_MAX_BODY_BYTES", defaults.max_bytes),
            backend,
            redis_url: env_str("REDIS_URL", &defaults.redis_url),
            operation_timeout: defaults.operation_timeout,
            sweep_interval: defaults.sweep_interval,
        }
    }
}

/// Read an environment variable and parse it, falling back to `default` when the
/// variable is unset or malformed.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    parse_or(std::env::var(key).ok(), default)
}

/// Read a boolean environment variable. Accepts `1/true/yes/on` and
/// `0/false/no/off`; anything else falls back to `default`.
pub fn env_bool(key: &str, default: bool) -> bool {
    bool_or(std::env::var(key).ok(), default)
}

/// Read a string environment variable, falling back to `default` when unset or empty.
pub fn env_str(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|value| value.trim().parse().ok()).unwrap_or(default)
}

fn bool_or(raw: Option<String>, default: bool) -> bool {
    match raw.map(|value| value.trim().to_ascii_lowercase()) {
        Some(value) if matches!(value.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(value) if matches!(value.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
