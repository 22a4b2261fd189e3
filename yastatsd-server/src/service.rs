use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use yastatsd_config::Config;
use yastatsd_system::{Addr, ServiceRunner, Shutdown};

use crate::services::aggregator::{AggregatorService, FlushConfig};
use crate::services::graphite::{GraphiteSink, GraphiteSinkConfig, TcpConnector};
use crate::services::listener::ListenerService;
use crate::services::repeater::Repeater;
use crate::services::sink::{SinkMessage, SinkService};

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the UDP socket failed.
    #[error("bind to udp socket failed")]
    BindFailed(#[source] io::Error),

    /// The tokio runtime could not be created.
    #[error("could not start the runtime")]
    RuntimeFailed(#[source] io::Error),
}

/// The running services of the daemon.
#[derive(Debug)]
pub struct ServiceState {
    runner: ServiceRunner,
    udp_addr: SocketAddr,
}

impl ServiceState {
    /// Binds the listener socket and starts all services.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(config: &Config) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(config.udp_addr())
            .await
            .map_err(ServerError::BindFailed)?;
        let udp_addr = socket.local_addr().map_err(ServerError::BindFailed)?;
        yastatsd_log::info!("listening for metrics on {udp_addr}");

        let mut runner = ServiceRunner::new();

        let mut sinks: Vec<Addr<SinkMessage>> = Vec::new();
        if let Some(graphite) = config.graphite() {
            let sink = GraphiteSink::new(
                GraphiteSinkConfig::new(config, graphite),
                TcpConnector::new(graphite.addr()),
            );
            sinks.push(runner.start(SinkService::new(sink)));
        }

        if sinks.is_empty() {
            yastatsd_log::warn!("no sinks configured, aggregates will be discarded");
        }

        let flush_config = FlushConfig {
            interval: config.flush_interval(),
        };
        let aggregator = runner.start(AggregatorService::new(flush_config, sinks));

        let repeater = Repeater::resolve(config.repeaters(), udp_addr).await;
        if !repeater.is_empty() {
            yastatsd_log::info!("repeating datagrams to {} peers", repeater.peers().len());
        }
        runner.start(ListenerService::new(socket, repeater, aggregator));

        Ok(Self { runner, udp_addr })
    }

    /// Returns the address the listener is bound to.
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Waits for all services to finish after a shutdown.
    ///
    /// A graceful shutdown waits at most for its timeout. An immediate shutdown does not wait for
    /// pending work.
    pub async fn join(self, shutdown: Shutdown) {
        let timeout = shutdown.timeout.unwrap_or_default();

        if tokio::time::timeout(timeout, self.runner.join())
            .await
            .is_err()
            && shutdown.timeout.is_some()
        {
            yastatsd_log::warn!("services did not finish within {timeout:?}, exiting anyway");
        }
    }
}
