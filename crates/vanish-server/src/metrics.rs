//! Metrics collection and export for Vanish.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use vanish_core::{Broker, BrokerStats};
use vanish_protocol::ErrorKind;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "vanish_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "vanish_connections_active";
    pub const ROOMS_CREATED: &str = "vanish_rooms_created_total";
    pub const ROOMS_REAPED: &str = "vanish_rooms_reaped_total";
    pub const ROOMS_ACTIVE: &str = "vanish_rooms_active";
    pub const MESSAGES_SENT: &str = "vanish_messages_sent_total";
    pub const MESSAGES_BUFFERED: &str = "vanish_messages_buffered";
    pub const DELIVERIES_DROPPED: &str = "vanish_deliveries_dropped_total";
    pub const ERRORS_TOTAL: &str = "vanish_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of socket connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of socket connections"
    );
    metrics::describe_counter!(names::ROOMS_CREATED, "Total number of rooms created");
    metrics::describe_counter!(
        names::ROOMS_REAPED,
        "Total number of rooms torn down for inactivity"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of live rooms");
    metrics::describe_counter!(names::MESSAGES_SENT, "Total number of messages accepted");
    metrics::describe_gauge!(
        names::MESSAGES_BUFFERED,
        "Messages currently held for pollers"
    );
    metrics::describe_counter!(
        names::DELIVERIES_DROPPED,
        "Events dropped because a socket's outbound queue was full"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of rejected requests");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new room.
pub fn record_room_created() {
    counter!(names::ROOMS_CREATED).increment(1);
}

/// Record an accepted message.
pub fn record_message(transport: &'static str) {
    counter!(names::MESSAGES_SENT, "transport" => transport).increment(1);
}

/// Record a rejected request.
pub fn record_error(kind: ErrorKind) {
    counter!(names::ERRORS_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Publish a broker snapshot.
pub fn record_stats(stats: &BrokerStats) {
    gauge!(names::ROOMS_ACTIVE).set(stats.active_rooms as f64);
    gauge!(names::MESSAGES_BUFFERED).set(stats.buffered_messages as f64);
    counter!(names::ROOMS_REAPED).absolute(stats.reaped_rooms);
    counter!(names::DELIVERIES_DROPPED).absolute(stats.dropped);
}

/// Refresh broker gauges every `interval` for as long as the broker lives.
pub fn spawn_stats_reporter(broker: Broker, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            record_stats(&broker.stats());
        }
    })
}

fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
