//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the session
//! guard. All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Underlying HTTP client settings.
    pub transport: TransportConfig,

    /// Token refresh coordination.
    pub refresh: RefreshConfig,

    /// Deferred-request queue.
    pub queue: QueueConfig,

    /// Transient-failure retries for ordinary requests.
    pub retries: RetryConfig,

    /// Endpoints excluded from interception.
    pub endpoints: EndpointConfig,

    /// Cross-context refresh notifications.
    pub notifier: NotifierConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base URL every request path is resolved against.
    pub base_url: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Refresh coordination settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Path of the credential refresh endpoint (POSTed with no body).
    pub endpoint: String,

    /// Where to send the user after the session is terminated.
    pub login_path: String,

    /// Consecutive refresh failures before the circuit opens.
    pub failure_threshold: u32,

    /// How long the circuit stays open, in milliseconds.
    pub circuit_cooldown_ms: u64,

    /// Retries of the refresh call within one breaker-gated attempt.
    pub max_refresh_retries: u32,

    /// Base backoff delay for refresh retries, in milliseconds.
    pub refresh_base_delay_ms: u64,

    /// Upper bound of the random jitter added to refresh backoff.
    pub refresh_jitter_ms: u64,

    /// Minimum age of the last refresh before a silent refresh runs. Also
    /// the timer period; must be greater than zero.
    pub silent_refresh_interval_secs: u64,

    /// Background time after which regaining focus triggers a silent refresh.
    pub idle_threshold_secs: u64,

    /// Delay before navigating to the login location.
    pub redirect_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            endpoint: "/refresh".to_string(),
            login_path: "/".to_string(),
            failure_threshold: 5,
            circuit_cooldown_ms: 30_000,
            max_refresh_retries: 3,
            refresh_base_delay_ms: 1000,
            refresh_jitter_ms: 1000,
            silent_refresh_interval_secs: 5 * 60,
            idle_threshold_secs: 5 * 60,
            redirect_delay_ms: 500,
        }
    }
}

impl RefreshConfig {
    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_millis(self.circuit_cooldown_ms)
    }

    pub fn refresh_base_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_base_delay_ms)
    }

    pub fn refresh_jitter(&self) -> Duration {
        Duration::from_millis(self.refresh_jitter_ms)
    }

    pub fn silent_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.silent_refresh_interval_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn redirect_delay(&self) -> Duration {
        Duration::from_millis(self.redirect_delay_ms)
    }
}

/// Queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of requests waiting on a refresh.
    pub max_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_size: 100 }
    }
}

/// Retry configuration for ordinary requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of retry attempts.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound of the random jitter in milliseconds.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 500,
            jitter_ms: 200,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

/// Endpoint lists.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Credential-lifecycle endpoints, never intercepted.
    pub skip: Vec<String>,

    /// Unauthenticated endpoints, never refreshed for.
    pub public: Vec<String>,

    /// Endpoints whose 401 means bad credentials rather than an expired session.
    pub auth_exempt: Vec<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            skip: owned(&["/refresh", "/logout", "/health", "/me"]),
            public: owned(&["/", "/auth/register", "/auth/login", "/public"]),
            auth_exempt: owned(&["/login", "/public"]),
        }
    }
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Cross-context notification settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Channel name shared by all participants of one session.
    pub channel: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channel: "auth".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
