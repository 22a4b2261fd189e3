//! Logging facade for all yastatsd crates.
//!
//! The facade exposes the `tracing` macros under a stable path so that crates do not depend on
//! `tracing` directly. Messages are written in lowercase without trailing punctuation. Errors are
//! attached as structured fields instead of being formatted into the message:
//!
//! ```
//! # let error = std::io::Error::other("boom");
//! yastatsd_log::error!(
//!     error = &error as &dyn std::error::Error,
//!     "failed to send flush to graphite"
//! );
//! ```
//!
//! # Setup
//!
//! The binary calls [`init`] once with the [`LogConfig`] from the configuration file. Tests use
//! [`init_test!`], which can be invoked any number of times.

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
