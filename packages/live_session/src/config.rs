use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;

// =============================================================================
// File config (figment-deserialized from defaults / TOML file / env vars)
// =============================================================================
//
//   config.toml:     [backoff]
//                    max_delay_ms = 60000
//
//   env var:         LIVE_SESSION_BACKOFF__MAX_DELAY_MS=60000
//                    (double underscore = nesting)

const ENV_PREFIX: &str = "LIVE_SESSION_";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub backoff: BackoffFileConfig,
    #[serde(default)]
    pub bridges: BridgeFileConfig,
    #[serde(default)]
    pub transport: TransportFileConfig,
}

/// Lives under `[session]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default = "default_outbound_queue_cap")]
    pub outbound_queue_cap: usize,
    #[serde(default = "default_event_backlog_cap")]
    pub event_backlog_cap: usize,
    #[serde(default)]
    pub reconnect_on_clean_close: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            outbound_queue_cap: default_outbound_queue_cap(),
            event_backlog_cap: default_event_backlog_cap(),
            reconnect_on_clean_close: false,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Lives under `[backoff]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackoffFileConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for BackoffFileConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

/// Lives under `[bridges]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeFileConfig {
    #[serde(default = "default_log_tail_max_items")]
    pub log_tail_max_items: usize,
    #[serde(default = "default_terminal_scrollback_kb")]
    pub terminal_scrollback_kb: usize,
}

impl Default for BridgeFileConfig {
    fn default() -> Self {
        Self {
            log_tail_max_items: default_log_tail_max_items(),
            terminal_scrollback_kb: default_terminal_scrollback_kb(),
        }
    }
}

/// Lives under `[transport]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportFileConfig {
    /// Endpoint with `{kind}` and `{subject}` placeholders.
    #[serde(default = "default_url_template")]
    pub url_template: String,
}

impl Default for TransportFileConfig {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
        }
    }
}

fn default_outbound_queue_cap() -> usize {
    256
}
fn default_event_backlog_cap() -> usize {
    4096
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.2
}
fn default_log_tail_max_items() -> usize {
    5000
}
fn default_terminal_scrollback_kb() -> usize {
    1024
}
fn default_url_template() -> String {
    "ws://127.0.0.1:8080/api/{kind}/{subject}/ws".to_string()
}

/// Build a figment that layers: defaults → TOML file (if given) → LIVE_SESSION_* env vars.
pub fn load_config(path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

/// Per-session runtime behavior.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Frames held while not open; oldest dropped beyond this
    pub outbound_queue_cap: usize,
    /// Events held until the first subscriber attaches
    pub event_backlog_cap: usize,
    pub reconnect_on_clean_close: bool,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}

impl SessionConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            outbound_queue_cap: fc.session.outbound_queue_cap.max(1),
            event_backlog_cap: fc.session.event_backlog_cap.max(1),
            reconnect_on_clean_close: fc.session.reconnect_on_clean_close,
            connect_timeout: Duration::from_secs(fc.session.connect_timeout_secs),
            backoff: BackoffPolicy {
                base_delay: Duration::from_millis(fc.backoff.base_delay_ms),
                max_delay: Duration::from_millis(fc.backoff.max_delay_ms),
                jitter: fc.backoff.jitter,
            },
        }
    }
}

/// Bridge retention limits.
#[derive(Clone, Debug)]
pub struct BridgeLimits {
    pub log_tail_max_items: usize,
    pub terminal_scrollback_bytes: usize,
}

impl Default for BridgeLimits {
    fn default() -> Self {
        Self::from_file(&BridgeFileConfig::default())
    }
}

impl BridgeLimits {
    pub fn from_file(fc: &BridgeFileConfig) -> Self {
        Self {
            log_tail_max_items: fc.log_tail_max_items.max(1),
            terminal_scrollback_bytes: fc.terminal_scrollback_kb * 1024,
        }
    }
}

/// Fully resolved configuration.
#[derive(Clone, Debug)]
pub struct MuxConfig {
    pub session: SessionConfig,
    pub bridges: BridgeLimits,
    pub url_template: String,
}

impl MuxConfig {
    /// Extract and validate from a figment built by [`load_config`].
    pub fn from_figment(figment: &figment::Figment) -> Result<Self, ConfigError> {
        let fc: FileConfig = figment.extract()?;
        Self::from_file(&fc)
    }

    pub fn from_file(fc: &FileConfig) -> Result<Self, ConfigError> {
        if fc.backoff.max_delay_ms < fc.backoff.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff.max_delay_ms ({}) is below backoff.base_delay_ms ({})",
                fc.backoff.max_delay_ms, fc.backoff.base_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&fc.backoff.jitter) {
            return Err(ConfigError::Invalid(format!(
                "backoff.jitter must be within 0.0..=1.0, got {}",
                fc.backoff.jitter
            )));
        }
        if fc.session.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if !fc.transport.url_template.contains("{subject}") {
            return Err(ConfigError::Invalid(
                "transport.url_template must contain {subject}".to_string(),
            ));
        }
        Ok(Self {
            session: SessionConfig::from_file(fc),
            bridges: BridgeLimits::from_file(&fc.bridges),
            url_template: fc.transport.url_template.clone(),
        })
    }

    /// Load from an optional TOML file plus environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(&load_config(path))
    }
}
