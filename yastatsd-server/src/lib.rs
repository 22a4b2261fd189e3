//! The yastatsd daemon: listener, flush scheduling and sinks.
//!
//! # Architecture
//!
//! The daemon runs a small set of services on a tokio runtime. Services communicate through
//! messages only and own their state exclusively:
//!
//! ```text
//!                  raw datagram
//!   UDP ──► Listener ─────────────► Repeater ──► peers
//!              │
//!              │ IngestMetrics
//!              ▼
//!         Aggregator ── every flush interval ──► FlushSnapshot ──► Sink (Graphite) ──► TCP
//! ```
//!
//!  - The **listener** receives datagrams, forwards them verbatim to the configured peers and
//!    parses them into metric events. Invalid lines are logged and skipped.
//!  - The **aggregator** owns the aggregation store. It ingests batches from the listener and
//!    drains the store on a fixed interval. Since ingestion and draining run on the same service
//!    loop, no event can be lost or counted twice across a flush boundary.
//!  - Every **sink** runs in its own service and receives the same immutable snapshot. A slow or
//!    disconnected sink never delays ingestion, the next flush, or other sinks.
//!
//! On `SIGTERM`, the aggregator flushes the partial window one last time and the sinks transmit
//! it before the process exits, bounded by the configured shutdown timeout.

#![warn(missing_docs)]

mod service;
mod services;

pub use self::service::*;
pub use self::services::aggregator::*;
pub use self::services::graphite::*;
pub use self::services::listener::*;
pub use self::services::repeater::*;
pub use self::services::sink::*;

use yastatsd_config::Config;
use yastatsd_system::Controller;

/// Runs the daemon and spawns all internal services.
///
/// This effectively boots the entire application. It blocks the current thread until a shutdown
/// signal is received or a fatal error happens during startup.
pub fn run(config: Config) -> Result<(), ServerError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("yastatsd")
        .enable_all()
        .build()
        .map_err(ServerError::RuntimeFailed)?;

    runtime.block_on(async move {
        Controller::start(config.shutdown_timeout());

        let state = ServiceState::start(&config).await?;
        yastatsd_log::info!("yastatsd started");

        let shutdown = Controller::shutdown_handle().notified().await;
        state.join(shutdown).await;

        yastatsd_log::info!("yastatsd shutdown complete");
        Ok(())
    })
}
