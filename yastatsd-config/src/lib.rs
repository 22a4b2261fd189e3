//! Configuration for the yastatsd daemon.
//!
//! The configuration is read from `config.yml` in a config directory. Every value has a
//! default, so the file and each of its sections are optional:
//!
//! ```yaml
//! yastatsd:
//!   port: 8125
//!   flush_interval: 10
//!   percent_thresholds: [90, 99]
//!   repeaters:
//!     - host: statsd-mirror.internal
//!       port: 8125
//! graphite:
//!   host: graphite.internal
//!   port: 2003
//! logging:
//!   level: debug
//! ```
//!
//! Values can be overridden from the command line or the environment through
//! [`OverridableConfig`].

#![warn(missing_docs)]

mod config;

pub use self::config::*;
