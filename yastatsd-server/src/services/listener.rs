use std::net::SocketAddr;

use tokio::net::UdpSocket;
use yastatsd_metrics::MetricEvent;
use yastatsd_system::{Addr, Controller, Receiver, Service};

use crate::services::aggregator::{Aggregator, IngestMetrics};
use crate::services::repeater::Repeater;

/// The largest datagram payload accepted.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Receives metrics over UDP.
///
/// Every datagram is first forwarded to the repeater and then parsed line by line. Malformed
/// lines are logged and skipped without affecting the rest of the datagram. The valid events of a
/// datagram are sent to the aggregator as a single batch.
#[derive(Debug)]
pub struct ListenerService {
    socket: UdpSocket,
    repeater: Repeater,
    aggregator: Addr<Aggregator>,
}

impl ListenerService {
    /// Creates the listener on a bound socket.
    pub fn new(socket: UdpSocket, repeater: Repeater, aggregator: Addr<Aggregator>) -> Self {
        Self {
            socket,
            repeater,
            aggregator,
        }
    }

    async fn handle_datagram(&self, payload: &[u8], peer: SocketAddr) {
        self.repeater.forward(&self.socket, payload);

        let mut events = Vec::new();
        let mut lines = MetricEvent::parse_all(payload);

        while let Some((line, result)) = lines.next_with_line() {
            match result {
                Ok(event) => events.push(event),
                Err(error) => yastatsd_log::debug!(
                    error = &error as &dyn std::error::Error,
                    line = %String::from_utf8_lossy(line),
                    %peer,
                    "invalid metric line"
                ),
            }
        }

        if !events.is_empty() {
            self.aggregator.send(IngestMetrics { events });
        }
    }
}

impl Service for ListenerService {
    type Interface = ();

    async fn run(self, _rx: Receiver<Self::Interface>) {
        let mut shutdown = Controller::shutdown_handle();
        let mut buf = vec![0; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, peer)) => self.handle_datagram(&buf[..len], peer).await,
                    Err(error) => yastatsd_log::warn!(
                        error = &error as &dyn std::error::Error,
                        "failed to receive datagram"
                    ),
                },
            }
        }

        yastatsd_log::info!("listener stopped");
    }
}
