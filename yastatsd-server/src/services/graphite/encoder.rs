use std::fmt::{self, Write};

use yastatsd_metrics::{AggregationSnapshot, TimerStats, TimerSummary, UnixTimestamp};

use super::GraphiteSinkConfig;

/// Formats a real number for the plaintext protocol.
///
/// Uses the shortest representation that parses back to the same value, and always includes a
/// decimal point: `0.5`, `7.0`, `100.0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GraphiteValue(pub f64);

impl fmt::Display for GraphiteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_finite() && self.0.fract() == 0.0 {
            write!(f, "{:.1}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A dotted metric path.
///
/// Whitespace in the metric name would break the line protocol and is replaced with `_`.
struct MetricPath<'a> {
    prefix: &'a str,
    name: &'a str,
}

impl fmt::Display for MetricPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.prefix.is_empty() {
            write!(f, "{}.", self.prefix)?;
        }

        for c in self.name.chars() {
            f.write_char(if c.is_whitespace() { '_' } else { c })?;
        }

        Ok(())
    }
}

struct Lines {
    buf: String,
    timestamp: UnixTimestamp,
}

impl Lines {
    fn push(&mut self, path: impl fmt::Display, value: impl fmt::Display) {
        // Writing to a string cannot fail.
        writeln!(self.buf, "{path} {value} {}", self.timestamp.as_secs()).ok();
    }

    fn push_summary(&mut self, path: impl fmt::Display + Copy, summary: &TimerSummary) {
        self.push(format_args!("{path}.sum"), GraphiteValue(summary.sum));
        self.push(format_args!("{path}.mean"), GraphiteValue(summary.mean));
        self.push(format_args!("{path}.upper"), GraphiteValue(summary.upper));
    }
}

/// Renders a snapshot into Graphite plaintext lines.
///
/// Timers are rendered first, then counters, then gauges. Every block is sorted by name and ends
/// with a `<summary_prefix>.<kind>.count` line, which is present even if the block is empty.
/// Counters are reported as a per-second rate over the flush interval.
pub fn render(
    config: &GraphiteSinkConfig,
    snapshot: &AggregationSnapshot,
    timestamp: UnixTimestamp,
) -> String {
    let mut lines = Lines {
        buf: String::new(),
        timestamp,
    };

    let summary_path = |name: &'static str| MetricPath {
        prefix: &config.summary_prefix,
        name,
    };

    for (name, timer) in snapshot.timers() {
        let Some(stats) = TimerStats::compute(timer, &config.percent_thresholds) else {
            continue;
        };

        let path = MetricPath {
            prefix: &config.timer_prefix,
            name,
        };

        for percentile in &stats.percentiles {
            let threshold = percentile.threshold;
            let lower = &percentile.summary;
            lines.push(
                format_args!("{path}.sum_{threshold}"),
                GraphiteValue(lower.sum),
            );
            lines.push(
                format_args!("{path}.mean_{threshold}"),
                GraphiteValue(lower.mean),
            );
            lines.push(
                format_args!("{path}.upper_{threshold}"),
                GraphiteValue(lower.upper),
            );
        }

        lines.push_summary(&path, &stats.total);
    }
    lines.push(summary_path("timers.count"), snapshot.timers().len());

    let interval = config.flush_interval.as_secs_f64();
    for (name, value) in snapshot.counters() {
        let path = MetricPath {
            prefix: &config.counter_prefix,
            name,
        };
        lines.push(path, GraphiteValue(value / interval));
    }
    lines.push(summary_path("counters.count"), snapshot.counters().len());

    for (name, gauge) in snapshot.gauges() {
        let path = MetricPath {
            prefix: &config.gauge_prefix,
            name,
        };
        lines.push(path, GraphiteValue(gauge.avg()));
    }
    lines.push(summary_path("gauges.count"), snapshot.gauges().len());

    lines.buf
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use similar_asserts::assert_eq;
    use yastatsd_metrics::{AggregationStore, MetricEvent};

    use super::*;

    fn config() -> GraphiteSinkConfig {
        GraphiteSinkConfig {
            counter_prefix: "stats".to_owned(),
            timer_prefix: "stats.timers".to_owned(),
            gauge_prefix: "stats.gauges".to_owned(),
            summary_prefix: "statsd".to_owned(),
            percent_thresholds: vec![90],
            flush_interval: Duration::from_secs(10),
            retry_interval: Duration::from_secs(5),
        }
    }

    fn snapshot(payload: &str) -> AggregationSnapshot {
        let mut store = AggregationStore::new();
        for event in MetricEvent::parse_all(payload.as_bytes()) {
            store.ingest(event.unwrap()).unwrap();
        }
        store.drain_and_reset(UnixTimestamp::from_secs(1000))
    }

    #[test]
    fn test_value_format() {
        assert_eq!(GraphiteValue(0.5).to_string(), "0.5");
        assert_eq!(GraphiteValue(7.0).to_string(), "7.0");
        assert_eq!(GraphiteValue(100.0).to_string(), "100.0");
        assert_eq!(GraphiteValue(-3.0).to_string(), "-3.0");
        assert_eq!(GraphiteValue(1.0 / 3.0).to_string(), "0.3333333333333333");
    }

    #[test]
    fn test_path_format() {
        let path = |prefix, name| MetricPath { prefix, name }.to_string();

        assert_eq!(path("stats", "a.b"), "stats.a.b");
        assert_eq!(path("", "a.b"), "a.b");
        assert_eq!(path("stats", "with space\tand tab"), "stats.with_space_and_tab");
    }

    #[test]
    fn test_render_datagram() {
        let snapshot = snapshot("a:5|c\nb:100|ms\nc:7|g\n");
        let output = render(&config(), &snapshot, snapshot.timestamp());

        insta::assert_snapshot!(output, @r"
        stats.timers.b.sum_90 100.0 1000
        stats.timers.b.mean_90 100.0 1000
        stats.timers.b.upper_90 100.0 1000
        stats.timers.b.sum 100.0 1000
        stats.timers.b.mean 100.0 1000
        stats.timers.b.upper 100.0 1000
        statsd.timers.count 1 1000
        stats.a 0.5 1000
        statsd.counters.count 1 1000
        stats.gauges.c 7.0 1000
        statsd.gauges.count 1 1000
        ");
    }

    #[test]
    fn test_render_empty() {
        let snapshot = snapshot("");
        let output = render(&config(), &snapshot, UnixTimestamp::from_secs(42));

        assert_eq!(
            output,
            "statsd.timers.count 0 42\nstatsd.counters.count 0 42\nstatsd.gauges.count 0 42\n"
        );
    }

    #[test]
    fn test_render_sorted_with_thresholds() {
        let mut config = config();
        config.percent_thresholds = vec![50, 90];
        config.timer_prefix = String::new();

        let snapshot = snapshot("zeta:4|ms\nalpha:1|ms\nalpha:3|ms\nalpha:2|ms\nalpha:4|ms");
        let output = render(&config, &snapshot, snapshot.timestamp());

        insta::assert_snapshot!(output, @r"
        alpha.sum_50 3.0 1000
        alpha.mean_50 1.5 1000
        alpha.upper_50 2.0 1000
        alpha.sum_90 10.0 1000
        alpha.mean_90 2.5 1000
        alpha.upper_90 4.0 1000
        alpha.sum 10.0 1000
        alpha.mean 2.5 1000
        alpha.upper 4.0 1000
        zeta.sum_50 4.0 1000
        zeta.mean_50 4.0 1000
        zeta.upper_50 4.0 1000
        zeta.sum_90 4.0 1000
        zeta.mean_90 4.0 1000
        zeta.upper_90 4.0 1000
        zeta.sum 4.0 1000
        zeta.mean 4.0 1000
        zeta.upper 4.0 1000
        statsd.timers.count 2 1000
        statsd.counters.count 0 1000
        statsd.gauges.count 0 1000
        ");
    }

    #[test]
    fn test_counter_rate() {
        let mut config = config();
        config.flush_interval = Duration::from_millis(500);

        let snapshot = snapshot("hits:10|c\nhits:5|c|@0.5\ngauge:10|g\ngauge:20|g");
        let output = render(&config, &snapshot, snapshot.timestamp());

        assert!(output.contains("stats.hits 40.0 1000\n"));
        assert!(output.contains("stats.gauges.gauge 15.0 1000\n"));
    }
}
