pub mod aggregator;
pub mod graphite;
pub mod listener;
pub mod repeater;
pub mod sink;
