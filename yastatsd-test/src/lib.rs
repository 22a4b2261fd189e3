//! Helpers for testing services.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner. All logs emitted with [`yastatsd_log`] will show up for test
//!    failures or when run with `--nocapture`.
//!
//! # Example
//!
//! ```no_run
//! #[test]
//! fn my_test() {
//!     yastatsd_test::setup();
//!
//!     yastatsd_log::debug!("hello, world!");
//! }
//! ```

use tokio::task::JoinHandle;
use yastatsd_system::{Addr, Interface, channel};

/// Setup the test environment.
///
///  - Initializes logs: The logger captures logs from all yastatsd crates and mutes all other logs.
pub fn setup() {
    yastatsd_log::init_test!();
}

/// Spawns a mock service that handles messages through a closure.
///
/// Note: Addr must be dropped before handle can be awaited.
pub fn mock_service<S, I, F>(name: &'static str, mut state: S, mut f: F) -> (Addr<I>, JoinHandle<S>)
where
    S: Send + 'static,
    I: Interface,
    F: FnMut(&mut S, I) + Send + 'static,
{
    let (addr, mut rx) = channel(name);

    let handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            f(&mut state, msg);
        }

        state
    });

    (addr, handle)
}
