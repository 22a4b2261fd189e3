//! Foundational system components for yastatsd's services.
//!
//! Every long-running component of the daemon is a [`Service`]: a future that owns its state
//! exclusively and receives messages through a [`Receiver`]. Other components talk to it through
//! a cloneable [`Addr`]. Graceful shutdown is coordinated by the [`Controller`].

#![warn(missing_docs)]

mod controller;
mod service;

pub use self::controller::*;
pub use self::service::*;
