use std::future::Future;
use std::sync::Arc;

use yastatsd_metrics::{AggregationSnapshot, UnixTimestamp};
use yastatsd_system::{Controller, FromMessage, Interface, Receiver, Service};

/// Hands the snapshot of a completed flush window to a sink.
#[derive(Clone, Debug)]
pub struct FlushSnapshot {
    /// The drained aggregates, shared between all sinks.
    pub snapshot: Arc<AggregationSnapshot>,
}

/// Messages accepted by a [`SinkService`].
#[derive(Debug)]
pub enum SinkMessage {
    /// A flush window has completed.
    Flush(FlushSnapshot),
}

impl Interface for SinkMessage {}

impl FromMessage<FlushSnapshot> for SinkMessage {
    fn from_message(message: FlushSnapshot) -> Self {
        Self::Flush(message)
    }
}

/// A downstream system receiving the aggregates of every flush window.
///
/// Sinks are driven by a [`SinkService`], which calls [`handle_flush`](Self::handle_flush) for
/// every snapshot and runs [`run_background`](Self::run_background) in between. Sinks that cannot
/// deliver a snapshot drop it; they never buffer across windows.
pub trait Sink: Send + 'static {
    /// A short name of the sink for logs.
    fn name(&self) -> &'static str;

    /// Renders and transmits a snapshot.
    fn handle_flush(
        &mut self,
        snapshot: &AggregationSnapshot,
        timestamp: UnixTimestamp,
    ) -> impl Future<Output = ()> + Send;

    /// Performs background work such as reconnecting.
    ///
    /// This future is dropped whenever a flush arrives and must therefore be cancel safe. The
    /// default implementation never resolves.
    fn run_background(&mut self) -> impl Future<Output = ()> + Send {
        std::future::pending()
    }
}

/// Runs a [`Sink`] as a service.
///
/// On a graceful shutdown, the service keeps handling flushes until the aggregator has stopped,
/// so the final window is still transmitted. An immediate shutdown stops the sink right away.
#[derive(Debug)]
pub struct SinkService<S> {
    sink: S,
}

impl<S: Sink> SinkService<S> {
    /// Wraps a sink into a service.
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

impl<S: Sink> Service for SinkService<S> {
    type Interface = SinkMessage;

    async fn run(mut self, mut rx: Receiver<Self::Interface>) {
        let mut shutdown = Controller::shutdown_handle();
        let mut draining = false;

        yastatsd_log::info!("{} sink started", self.sink.name());

        loop {
            tokio::select! {
                biased;

                message = rx.recv() => match message {
                    Some(SinkMessage::Flush(FlushSnapshot { snapshot })) => {
                        self.sink.handle_flush(&snapshot, snapshot.timestamp()).await;
                    }
                    None => break,
                },
                message = shutdown.notified(), if !draining => match message.timeout {
                    Some(_) => draining = true,
                    None => break,
                },
                () = self.sink.run_background() => (),
            }
        }

        yastatsd_log::info!("{} sink stopped", self.sink.name());
    }
}
