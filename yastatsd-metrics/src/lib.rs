//! Metric protocol, aggregation and statistics for yastatsd.
//!
//! # Protocol
//!
//! Clients submit metrics in a text format over UDP. A datagram contains one or more metrics
//! separated by newlines. Each metric has the following form:
//!
//! ```text
//! <name>:<value>|<type>[|@<sample_rate>]
//! ```
//!
//! - `name` is an arbitrary name without `:` or `|`. It becomes part of the dotted path in
//!   the rendered output.
//! - `value` is a signed 64-bit integer.
//! - `type` is one of `c` (counter), `ms` (timer) or `g` (gauge). See [`MetricType`].
//! - `sample_rate` is a float in `(0, 1]` describing which fraction of actual events the
//!   reported event represents. It defaults to `1`.
//!
//! ```text
//! requests:1|c|@0.1
//! response_time:203|ms
//! workers:12|g
//! ```
//!
//! Lines are parsed into [`MetricEvent`]s with [`MetricEvent::parse_all`].
//!
//! # Aggregation
//!
//! The [`AggregationStore`] keeps the accumulators of the current flush window. Draining the store
//! produces an immutable [`AggregationSnapshot`] and starts a fresh window. Derived timer
//! statistics are computed from the snapshot with [`TimerStats`].

#![warn(missing_docs)]

mod event;
mod percentiles;
mod protocol;
mod store;

pub use self::event::*;
pub use self::percentiles::*;
pub use self::protocol::*;
pub use self::store::*;
pub use yastatsd_common::UnixTimestamp;
