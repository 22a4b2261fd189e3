//! Sink for Graphite's plaintext protocol.
//!
//! Every flush window is rendered into lines of the form `<path> <value> <timestamp>` and written
//! to a persistent TCP connection. While the connection is down, flushes are dropped.

use std::time::Duration;

use yastatsd_config::{Config, GraphiteConfig};
use yastatsd_metrics::{AggregationSnapshot, UnixTimestamp};

use crate::services::sink::Sink;

mod encoder;
mod transport;

pub use self::encoder::{GraphiteValue, render};
pub use self::transport::{
    Connect, SinkTransportError, TcpConnector, Transport, TransportStatus,
};

/// Static settings of a [`GraphiteSink`].
#[derive(Clone, Debug, PartialEq)]
pub struct GraphiteSinkConfig {
    /// Prefix of counter paths.
    pub counter_prefix: String,
    /// Prefix of timer paths.
    pub timer_prefix: String,
    /// Prefix of gauge paths.
    pub gauge_prefix: String,
    /// Prefix of the `*.count` summary paths.
    pub summary_prefix: String,
    /// Percentile thresholds rendered for every timer.
    pub percent_thresholds: Vec<u8>,
    /// The length of a flush window, used to compute counter rates.
    pub flush_interval: Duration,
    /// Time between reconnection attempts.
    pub retry_interval: Duration,
}

impl GraphiteSinkConfig {
    /// Collects the sink settings from the daemon configuration.
    pub fn new(config: &Config, graphite: &GraphiteConfig) -> Self {
        Self {
            counter_prefix: graphite.counter_prefix.clone(),
            timer_prefix: graphite.timer_prefix.clone(),
            gauge_prefix: graphite.gauge_prefix.clone(),
            summary_prefix: graphite.summary_prefix.clone(),
            percent_thresholds: config.percent_thresholds().to_vec(),
            flush_interval: config.flush_interval(),
            retry_interval: config.conn_retry_interval(),
        }
    }
}

/// Sends aggregates to Graphite.
#[derive(Debug)]
pub struct GraphiteSink<C: Connect> {
    config: GraphiteSinkConfig,
    transport: Transport<C>,
}

impl<C: Connect> GraphiteSink<C> {
    /// Creates the sink and starts connecting.
    pub fn new(config: GraphiteSinkConfig, connector: C) -> Self {
        let transport = Transport::new(connector, config.retry_interval);
        Self { config, transport }
    }

    /// Returns the connection status.
    pub fn status(&self) -> TransportStatus {
        self.transport.status()
    }
}

impl<C: Connect> Sink for GraphiteSink<C> {
    fn name(&self) -> &'static str {
        "graphite"
    }

    async fn handle_flush(&mut self, snapshot: &AggregationSnapshot, timestamp: UnixTimestamp) {
        let payload = render(&self.config, snapshot, timestamp);

        if let Err(error) = self.transport.send(payload.as_bytes()).await {
            yastatsd_log::debug!(
                error = &error as &dyn std::error::Error,
                "dropping graphite flush at {timestamp}"
            );
        }
    }

    async fn run_background(&mut self) {
        loop {
            self.transport.drive().await;
        }
    }
}
