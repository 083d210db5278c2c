//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - A TOML file (`$VANISH_CONFIG`, `vanish.toml`, `/etc/vanish/vanish.toml`
//!   or `~/.config/vanish/vanish.toml`, first one found)
//! - Environment variables (`VANISH_PORT`, `VANISH_BROKER__IDLE_TIMEOUT_MS`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use vanish_core::{BrokerConfig, TypingReport};

/// Default search paths for the configuration file.
const CONFIG_PATHS: [&str; 3] = [
    "vanish.toml",
    "/etc/vanish/vanish.toml",
    "~/.config/vanish/vanish.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Broker limits and timings.
    #[serde(default)]
    pub broker: BrokerSection,

    /// Out-of-band notifications.
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Cross-origin access.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Broker settings, with durations in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,

    /// How long polls keep returning a message.
    #[serde(default = "default_poll_window")]
    pub poll_window_ms: u64,

    /// How long clients keep a message on screen.
    #[serde(default = "default_display_ttl")]
    pub display_ttl_ms: u64,

    #[serde(default = "default_typing_timeout")]
    pub typing_timeout_ms: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    /// Outbound queue size per socket.
    #[serde(default = "default_handle_capacity")]
    pub handle_capacity: usize,

    #[serde(default)]
    pub typing_report: TypingReport,
}

/// Notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Log room creation and joins.
    #[serde(default = "default_true")]
    pub log: bool,
}

/// CORS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    /// How often broker gauges are refreshed, in milliseconds.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_text_chars() -> usize {
    1000
}

fn default_poll_window() -> u64 {
    5_000
}

fn default_display_ttl() -> u64 {
    15_000
}

fn default_typing_timeout() -> u64 {
    3_000
}

fn default_idle_timeout() -> u64 {
    60 * 60 * 1000 // 1 hour
}

fn default_handle_capacity() -> usize {
    64
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_stats_interval() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            websocket_path: default_ws_path(),
            broker: BrokerSection::default(),
            notifications: NotificationsConfig::default(),
            cors: CorsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            max_text_chars: default_max_text_chars(),
            poll_window_ms: default_poll_window(),
            display_ttl_ms: default_display_ttl(),
            typing_timeout_ms: default_typing_timeout(),
            idle_timeout_ms: default_idle_timeout(),
            handle_capacity: default_handle_capacity(),
            typing_report: TypingReport::default(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { log: true }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            stats_interval_ms: default_stats_interval(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, overlaid with
    /// `VANISH_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::find_file())
    }

    /// Load configuration from an optional file overlaid with the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be merged or deserialized.
    pub fn load_from(file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            tracing::info!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix("VANISH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Render the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }

    fn find_file() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var("VANISH_CONFIG") {
            return Some(PathBuf::from(shellexpand::tilde(&explicit).as_ref()));
        }

        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Broker settings in the broker's own terms.
    #[must_use]
    pub fn broker_config(&self) -> BrokerConfig {
        let broker = &self.broker;
        BrokerConfig {
            max_text_chars: broker.max_text_chars,
            poll_window: Duration::from_millis(broker.poll_window_ms),
            display_ttl: Duration::from_millis(broker.display_ttl_ms),
            typing_timeout: Duration::from_millis(broker.typing_timeout_ms),
            idle_timeout: Duration::from_millis(broker.idle_timeout_ms),
            handle_capacity: broker.handle_capacity,
            typing_report: broker.typing_report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.websocket_path, "/ws");
        assert!(config.cors.allowed_origins.is_empty());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 3000);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_broker_defaults_match_core() {
        let from_server = Config::default().broker_config();
        let core = BrokerConfig::default();
        assert_eq!(from_server.max_text_chars, core.max_text_chars);
        assert_eq!(from_server.poll_window, core.poll_window);
        assert_eq!(from_server.display_ttl, core.display_ttl);
        assert_eq!(from_server.typing_timeout, core.typing_timeout);
        assert_eq!(from_server.idle_timeout, core.idle_timeout);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [broker]
            idle_timeout_ms = 60000
            typing_report = "connected"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.broker.max_text_chars, 1000);

        let broker = config.broker_config();
        assert_eq!(broker.idle_timeout, Duration::from_secs(60));
        assert_eq!(broker.typing_report, TypingReport::Connected);
    }

    #[tokio::test]
    async fn test_member_cap_is_not_configurable() {
        let config: Config = toml::from_str("[broker]\nmax_members = 5\n").unwrap();
        let broker = vanish_core::Broker::new(config.broker_config());

        broker
            .create_room(vanish_protocol::CreateRoomRequest {
                room_code: Some("R1".into()),
                creator_id: Some("1".into()),
            })
            .unwrap();
        let join = |user: &str| {
            broker.join_room(vanish_protocol::JoinRoomRequest {
                room_code: Some("R1".into()),
                user_id: Some(user.into()),
                ..Default::default()
            })
        };

        assert_eq!(join("2").unwrap().user_count, 2);
        assert_eq!(
            join("3").unwrap_err().kind(),
            vanish_protocol::ErrorKind::Full
        );
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("vanish-test-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 4100\n[metrics]\nenabled = false\n").unwrap();

        let config = Config::load_from(Some(path.clone())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 4100);
        assert!(!config.metrics.enabled);
        assert_eq!(config.broker.poll_window_ms, 5_000);
    }

    #[test]
    fn test_rendered_config_parses_back() {
        let rendered = Config::default().to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.port, 3000);
        assert_eq!(parsed.broker.idle_timeout_ms, 3_600_000);
    }
}
