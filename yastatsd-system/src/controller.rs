use std::io;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::watch;

/// Shutdown request message sent by the [`Controller`] to subscribed services.
///
/// A handler has to ensure that it doesn't take longer than `timeout` to resolve the future.
/// Ideally, open work is persisted or finished in an orderly manner but no new requests are
/// accepted anymore.
///
/// After the timeout the system will shut down regardless of what the receivers of this message
/// do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate forced shutdown.
    pub timeout: Option<Duration>,
}

/// Indicates the type of shutdown requested through [`Controller::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Shut down gracefully within the configured timeout.
    Graceful,
    /// Shut down immediately without finishing pending work.
    Immediate,
}

/// The current shutdown state, broadcast to every [`ShutdownHandle`].
static SHUTDOWN: Lazy<watch::Sender<Option<Shutdown>>> = Lazy::new(|| watch::channel(None).0);

/// Requests a shutdown without a process signal.
static MANUAL_SHUTDOWN: Lazy<watch::Sender<Option<ShutdownMode>>> =
    Lazy::new(|| watch::channel(None).0);

/// Notifies a service about an upcoming shutdown.
///
/// Obtained through [`Controller::shutdown_handle`].
#[derive(Debug)]
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Wait for a shutdown.
    ///
    /// This receives all shutdown signals since the [`Controller`] has been started, even before
    /// this shutdown handle has been obtained.
    ///
    /// # Cancel safety
    ///
    /// This method is cancellation safe and can be used in `select!`.
    pub async fn notified(&mut self) -> Shutdown {
        loop {
            if let Some(shutdown) = *self.0.borrow_and_update() {
                return shutdown;
            }

            // The sender lives in a static and is never dropped.
            if self.0.changed().await.is_err() {
                return Shutdown { timeout: None };
            }
        }
    }
}

/// Service to start and gracefully stop the system runtime.
///
/// The controller listens for the process signals `SIGINT`, `SIGQUIT` and `SIGTERM`. Upon
/// receiving one, it broadcasts a [`Shutdown`] message to every service holding a
/// [`ShutdownHandle`]:
///
///  - `SIGINT` and `SIGQUIT` request an immediate shutdown without a timeout.
///  - `SIGTERM` requests a graceful shutdown with the configured timeout.
///
/// ### Example
///
/// ```no_run
/// use std::time::Duration;
/// use yastatsd_system::Controller;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// Controller::start(Duration::from_secs(10));
///
/// let mut shutdown = Controller::shutdown_handle();
/// let message = shutdown.notified().await;
/// # }
/// ```
#[derive(Debug)]
pub struct Controller;

impl Controller {
    /// Starts a controller that monitors shutdown signals.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(shutdown_timeout: Duration) {
        tokio::spawn(async move {
            if let Err(error) = monitor_shutdown(shutdown_timeout).await {
                yastatsd_log::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to monitor shutdown signals"
                );
            }
        });
    }

    /// Returns a [handle](ShutdownHandle) to receive shutdown notifications.
    pub fn shutdown_handle() -> ShutdownHandle {
        ShutdownHandle(SHUTDOWN.subscribe())
    }

    /// Manually initiates the shutdown process of the system.
    pub fn shutdown(mode: ShutdownMode) {
        MANUAL_SHUTDOWN.send_replace(Some(mode));
    }
}

async fn monitor_shutdown(timeout: Duration) -> io::Result<()> {
    let mut manual = MANUAL_SHUTDOWN.subscribe();

    // A shutdown requested before the controller started must not get lost.
    let initial = *manual.borrow_and_update();
    let mode = match initial {
        Some(mode) => mode,
        None => wait_for_signal(&mut manual).await?,
    };

    let shutdown = match mode {
        ShutdownMode::Graceful => Shutdown {
            timeout: Some(timeout),
        },
        ShutdownMode::Immediate => Shutdown { timeout: None },
    };

    SHUTDOWN.send_replace(Some(shutdown));
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal(
    manual: &mut watch::Receiver<Option<ShutdownMode>>,
) -> io::Result<ShutdownMode> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_quit = signal(SignalKind::quit())?;
    let mut sig_term = signal(SignalKind::terminate())?;

    let mode = tokio::select! {
        biased;

        Some(()) = sig_int.recv() => {
            yastatsd_log::info!("SIGINT received, exiting");
            ShutdownMode::Immediate
        }
        Some(()) = sig_quit.recv() => {
            yastatsd_log::info!("SIGQUIT received, exiting");
            ShutdownMode::Immediate
        }
        Some(()) = sig_term.recv() => {
            yastatsd_log::info!("SIGTERM received, stopping gracefully");
            ShutdownMode::Graceful
        }
        mode = wait_for_manual(manual) => mode,
    };

    Ok(mode)
}

#[cfg(not(unix))]
async fn wait_for_signal(
    manual: &mut watch::Receiver<Option<ShutdownMode>>,
) -> io::Result<ShutdownMode> {
    tokio::select! {
        biased;

        result = tokio::signal::ctrl_c() => {
            result?;
            yastatsd_log::info!("SIGINT received, exiting");
            Ok(ShutdownMode::Immediate)
        }
        mode = wait_for_manual(manual) => Ok(mode),
    }
}

async fn wait_for_manual(manual: &mut watch::Receiver<Option<ShutdownMode>>) -> ShutdownMode {
    loop {
        if manual.changed().await.is_err() {
            return std::future::pending().await;
        }

        if let Some(mode) = *manual.borrow_and_update() {
            yastatsd_log::info!("shutdown requested, mode {mode:?}");
            return mode;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The controller state is process-global, so all assertions live in a single test.
    #[tokio::test]
    async fn test_manual_graceful_shutdown() {
        let mut handle = Controller::shutdown_handle();

        // Requested before the controller runs, so it is picked up from the initial value.
        Controller::shutdown(ShutdownMode::Graceful);
        Controller::start(Duration::from_secs(3));

        let shutdown = handle.notified().await;
        assert_eq!(shutdown.timeout, Some(Duration::from_secs(3)));

        // Handles obtained after the fact still observe the shutdown.
        let mut late = Controller::shutdown_handle();
        assert_eq!(late.notified().await, shutdown);
    }
}
