//! The yastatsd binary.
//!
//! Receives counters, timers and gauges in the statsd line protocol over UDP, aggregates them
//! over a fixed flush interval, and writes the derived statistics to Graphite.
//!
//! ```text
//! yastatsd run --config ./config --port 8125 --graphite-host graphite.internal
//! ```
//!
//! Run `yastatsd --help` for all options.

mod cli;
mod cliapp;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            yastatsd_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
