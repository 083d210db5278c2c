//! Broker configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the poll response fills `typingUsers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingReport {
    /// Users with a live `typing_start` that has not stopped or timed out.
    #[default]
    Tracked,
    /// Every user with a connected handle, typing or not.
    Connected,
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum message length in Unicode scalar values.
    pub max_text_chars: usize,
    /// How long after receipt a message is returned by polls.
    pub poll_window: Duration,
    /// How long consumers keep a message on screen; sent as `expiresAt`.
    pub display_ttl: Duration,
    /// Delay before an unanswered `typing_start` is stopped by the server.
    pub typing_timeout: Duration,
    /// Inactivity after which a room is torn down.
    pub idle_timeout: Duration,
    /// Per-handle outbound queue capacity.
    pub handle_capacity: usize,
    /// Source of the poll response's typing users.
    pub typing_report: TypingReport,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_text_chars: 1000,
            poll_window: Duration::from_secs(5),
            display_ttl: Duration::from_secs(15),
            typing_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(60 * 60),
            handle_capacity: 64,
            typing_report: TypingReport::Tracked,
        }
    }
}
