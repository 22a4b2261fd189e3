use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use yastatsd_metrics::{AggregationStore, MetricEvent, UnixTimestamp};
use yastatsd_system::{Addr, Controller, FromMessage, Interface, Receiver, Service, Shutdown};

use crate::services::sink::{FlushSnapshot, SinkMessage};

/// Settings of the [`AggregatorService`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushConfig {
    /// The length of a flush window.
    pub interval: Duration,
}

/// A batch of parsed metric events from a single datagram.
#[derive(Clone, Debug, PartialEq)]
pub struct IngestMetrics {
    /// The events in the order they appeared in the datagram.
    pub events: Vec<MetricEvent>,
}

/// Messages accepted by the [`AggregatorService`].
#[derive(Debug)]
pub enum Aggregator {
    /// Adds events to the current flush window.
    IngestMetrics(IngestMetrics),
}

impl Interface for Aggregator {}

impl FromMessage<IngestMetrics> for Aggregator {
    fn from_message(message: IngestMetrics) -> Self {
        Self::IngestMetrics(message)
    }
}

/// Owns the aggregation store and flushes it to all sinks on a fixed interval.
///
/// Ingestion and flushing both run on the service loop, so every event is part of exactly one
/// snapshot. Sinks receive snapshots through their own message queues; the aggregator never
/// waits for their I/O.
#[derive(Debug)]
pub struct AggregatorService {
    store: AggregationStore,
    config: FlushConfig,
    sinks: Vec<Addr<SinkMessage>>,
}

impl AggregatorService {
    /// Creates a new aggregator that flushes to the given sinks in order.
    pub fn new(config: FlushConfig, sinks: Vec<Addr<SinkMessage>>) -> Self {
        Self {
            store: AggregationStore::new(),
            config,
            sinks,
        }
    }

    fn handle_ingest(&mut self, message: IngestMetrics) {
        for event in message.events {
            if let Err(error) = self.store.ingest(event) {
                yastatsd_log::debug!(
                    error = &error as &dyn std::error::Error,
                    "rejected metric"
                );
            }
        }
    }

    fn try_flush(&mut self) {
        let snapshot = self.store.drain_and_reset(UnixTimestamp::now());

        yastatsd_log::debug!(
            counters = snapshot.counters().len(),
            timers = snapshot.timers().len(),
            gauges = snapshot.gauges().len(),
            "flushing aggregates at {}",
            snapshot.timestamp(),
        );

        let snapshot = Arc::new(snapshot);
        for sink in &self.sinks {
            sink.send(FlushSnapshot {
                snapshot: snapshot.clone(),
            });
        }
    }

    fn handle_shutdown(&mut self, rx: &mut Receiver<Aggregator>, message: Shutdown) {
        if message.timeout.is_none() {
            yastatsd_log::info!("shutting down aggregator, dropping the current window");
            return;
        }

        yastatsd_log::info!("shutting down aggregator, flushing the current window");

        // Batches that arrived before the shutdown still belong to the final window.
        while let Some(Aggregator::IngestMetrics(message)) = rx.try_recv() {
            self.handle_ingest(message);
        }

        self.try_flush();
    }
}

impl Service for AggregatorService {
    type Interface = Aggregator;

    async fn run(mut self, mut rx: Receiver<Self::Interface>) {
        let interval = self.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut shutdown = Controller::shutdown_handle();

        yastatsd_log::info!("aggregator started, flushing every {interval:?}");

        loop {
            tokio::select! {
                biased;

                _ = ticker.tick() => self.try_flush(),
                message = shutdown.notified() => {
                    self.handle_shutdown(&mut rx, message);
                    break;
                }
                message = rx.recv() => match message {
                    Some(Aggregator::IngestMetrics(message)) => self.handle_ingest(message),
                    None => break,
                },
            }
        }

        yastatsd_log::info!("aggregator stopped");
    }
}
