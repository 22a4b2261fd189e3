//! Common utilities shared by the yastatsd crates.

#![warn(missing_docs)]

mod time;

pub use self::time::*;
