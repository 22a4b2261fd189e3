use std::collections::BTreeMap;

use serde::Serialize;

use crate::{CounterType, GaugeType, MetricEvent, MetricType, TimerType, UnixTimestamp};

/// An error returned when an event cannot be added to the [`AggregationStore`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum AggregateMetricsError {
    /// A timer was submitted with a sample rate other than `1`.
    ///
    /// Sampling a duration has no defined meaning, so such events are rejected as malformed.
    #[error("sample rate {sample_rate} specified for timer {name}")]
    SamplingOnTimer {
        /// The name of the rejected timer.
        name: String,
        /// The sample rate submitted with the timer.
        sample_rate: f64,
    },

    /// The sampling-corrected counter value is no longer a finite number.
    ///
    /// The event is rejected and the counter keeps its previous value.
    #[error("counter {name} overflows with sample rate {sample_rate}")]
    CounterOverflow {
        /// The name of the rejected counter.
        name: String,
        /// The sample rate submitted with the counter.
        sample_rate: f64,
    },
}

/// The samples of a timer within one flush window.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TimerValue {
    values: Vec<TimerType>,
    sum: f64,
}

impl TimerValue {
    /// Adds a sample to the timer.
    pub fn insert(&mut self, value: TimerType) {
        self.values.push(value);
        self.sum += value as f64;
    }

    /// Returns all samples in insertion order.
    pub fn values(&self) -> &[TimerType] {
        &self.values
    }

    /// Returns the running sum of all samples.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the timer has no samples.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<TimerType> for TimerValue {
    fn from_iter<T: IntoIterator<Item = TimerType>>(iter: T) -> Self {
        let mut timer = Self::default();
        for value in iter {
            timer.insert(value);
        }
        timer
    }
}

/// A gauge that averages all values reported within one flush window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct GaugeValue {
    /// The sum of all values reported in the window.
    pub sum: GaugeType,
    /// The number of values reported in the window.
    pub count: u64,
}

impl GaugeValue {
    /// Adds a value to the gauge.
    pub fn insert(&mut self, value: GaugeType) {
        self.sum += value;
        self.count += 1;
    }

    /// Returns the average of all values reported in this window.
    pub fn avg(&self) -> GaugeType {
        if self.count > 0 {
            self.sum / self.count as GaugeType
        } else {
            0.0
        }
    }
}

/// Accumulators of a single flush window.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
struct Accumulators {
    counters: BTreeMap<String, CounterType>,
    timers: BTreeMap<String, TimerValue>,
    gauges: BTreeMap<String, GaugeValue>,
}

impl Accumulators {
    fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.timers.is_empty() && self.gauges.is_empty()
    }
}

/// The drained state of one flush window.
///
/// A snapshot is created by [`AggregationStore::drain_and_reset`] and never mutated afterwards.
/// All maps are ordered by metric name, so that consumers produce deterministic output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregationSnapshot {
    timestamp: UnixTimestamp,
    #[serde(flatten)]
    accumulators: Accumulators,
}

impl AggregationSnapshot {
    /// Returns the end of the flush window.
    pub fn timestamp(&self) -> UnixTimestamp {
        self.timestamp
    }

    /// Returns the sampling-corrected counter sums by name.
    pub fn counters(&self) -> &BTreeMap<String, CounterType> {
        &self.accumulators.counters
    }

    /// Returns the timer samples by name.
    pub fn timers(&self) -> &BTreeMap<String, TimerValue> {
        &self.accumulators.timers
    }

    /// Returns the gauges by name.
    pub fn gauges(&self) -> &BTreeMap<String, GaugeValue> {
        &self.accumulators.gauges
    }

    /// Returns `true` if no metrics were received in this window.
    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }
}

/// In-memory aggregation of the current flush window.
///
/// The store is owned by a single task. Ingestion and draining take `&mut self` and therefore
/// never interleave: every event ends up in exactly one snapshot.
///
/// # Example
///
/// ```
/// use yastatsd_metrics::{AggregationStore, MetricEvent, UnixTimestamp};
///
/// let mut store = AggregationStore::new();
/// store.ingest(MetricEvent::parse(b"hits:1|c|@0.5").unwrap()).unwrap();
///
/// let snapshot = store.drain_and_reset(UnixTimestamp::from_secs(60));
/// assert_eq!(snapshot.counters()["hits"], 2.0);
/// assert!(store.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct AggregationStore {
    current: Accumulators,
}

impl AggregationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event to the current window.
    ///
    /// Counters accumulate `value / sample_rate`, gauges accumulate their sum and count, and
    /// timers record every sample. Timers with a sample rate other than `1` are rejected and not
    /// recorded.
    pub fn ingest(&mut self, event: MetricEvent) -> Result<(), AggregateMetricsError> {
        let MetricEvent {
            name,
            ty,
            value,
            sample_rate,
        } = event;

        match ty {
            MetricType::Counter => {
                let previous = self.current.counters.get(&name).copied().unwrap_or_default();
                let corrected = previous + value as f64 / sample_rate;
                if !corrected.is_finite() {
                    return Err(AggregateMetricsError::CounterOverflow { name, sample_rate });
                }
                self.current.counters.insert(name, corrected);
            }
            MetricType::Gauge => {
                self.current
                    .gauges
                    .entry(name)
                    .or_default()
                    .insert(value as GaugeType);
            }
            MetricType::Timer => {
                if sample_rate != 1.0 {
                    return Err(AggregateMetricsError::SamplingOnTimer { name, sample_rate });
                }
                self.current.timers.entry(name).or_default().insert(value);
            }
        }

        Ok(())
    }

    /// Returns `true` if nothing was ingested since the last drain.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Captures the current window as a snapshot and starts a new, empty window.
    pub fn drain_and_reset(&mut self, timestamp: UnixTimestamp) -> AggregationSnapshot {
        AggregationSnapshot {
            timestamp,
            accumulators: std::mem::take(&mut self.current),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn event(line: &str) -> MetricEvent {
        MetricEvent::parse(line.as_bytes()).unwrap()
    }

    fn ts() -> UnixTimestamp {
        UnixTimestamp::from_secs(1_700_000_000)
    }

    #[test]
    fn test_counter_accumulates() {
        let mut store = AggregationStore::new();
        for _ in 0..7 {
            store.ingest(event("hits:3|c")).unwrap();
        }

        let snapshot = store.drain_and_reset(ts());
        assert_eq!(snapshot.counters()["hits"], 21.0);
    }

    #[test]
    fn test_counter_sampling_correction() {
        let mut store = AggregationStore::new();
        store.ingest(event("hits:3|c|@0.1")).unwrap();
        store.ingest(event("hits:1|c|@0.5")).unwrap();

        let snapshot = store.drain_and_reset(ts());
        let expected = 3.0 / 0.1 + 1.0 / 0.5;
        assert_eq!(snapshot.counters()["hits"], expected);
    }

    #[test]
    fn test_counter_rejects_overflow() {
        let mut store = AggregationStore::new();
        store.ingest(event("hits:2|c")).unwrap();

        let result = store.ingest(event("hits:1|c|@1e-320"));
        assert_eq!(
            result,
            Err(AggregateMetricsError::CounterOverflow {
                name: "hits".to_owned(),
                sample_rate: 1e-320,
            })
        );

        let result = store.ingest(event("fresh:1|c|@1e-320"));
        assert!(result.is_err());

        let snapshot = store.drain_and_reset(ts());
        assert_eq!(snapshot.counters()["hits"], 2.0);
        assert!(!snapshot.counters().contains_key("fresh"));
    }

    #[test]
    fn test_gauge_average() {
        let mut store = AggregationStore::new();
        store.ingest(event("g1:10|g")).unwrap();
        store.ingest(event("g1:20|g")).unwrap();

        let snapshot = store.drain_and_reset(ts());
        let gauge = snapshot.gauges()["g1"];
        assert_eq!(gauge, GaugeValue { sum: 30.0, count: 2 });
        assert_eq!(gauge.avg(), 15.0);
    }

    #[test]
    fn test_gauge_ignores_sample_rate() {
        let mut store = AggregationStore::new();
        store.ingest(event("g1:10|g|@0.5")).unwrap();

        let snapshot = store.drain_and_reset(ts());
        assert_eq!(snapshot.gauges()["g1"].avg(), 10.0);
    }

    #[test]
    fn test_timer_samples() {
        let mut store = AggregationStore::new();
        store.ingest(event("t:5|ms")).unwrap();
        store.ingest(event("t:1|ms")).unwrap();
        store.ingest(event("t:5|ms|@1")).unwrap();

        let snapshot = store.drain_and_reset(ts());
        let timer = &snapshot.timers()["t"];
        assert_eq!(timer.values(), &[5, 1, 5]);
        assert_eq!(timer.sum(), 11.0);
    }

    #[test]
    fn test_timer_rejects_sampling() {
        let mut store = AggregationStore::new();
        let result = store.ingest(event("t:5|ms|@0.5"));

        assert_eq!(
            result,
            Err(AggregateMetricsError::SamplingOnTimer {
                name: "t".to_owned(),
                sample_rate: 0.5,
            })
        );
        insta::assert_snapshot!(result.unwrap_err(), @"sample rate 0.5 specified for timer t");
        assert!(store.is_empty());
        assert!(store.drain_and_reset(ts()).timers().is_empty());
    }

    #[test]
    fn test_drain_resets_all_accumulators() {
        let mut store = AggregationStore::new();
        store.ingest(event("a:1|c")).unwrap();
        store.ingest(event("b:1|ms")).unwrap();
        store.ingest(event("c:1|g")).unwrap();

        let first = store.drain_and_reset(ts());
        assert!(!first.is_empty());
        assert_eq!(first.timestamp(), ts());

        let second = store.drain_and_reset(UnixTimestamp::from_secs(1_700_000_010));
        assert!(second.is_empty());
        assert!(second.counters().is_empty());
        assert!(second.timers().is_empty());
        assert!(second.gauges().is_empty());
    }

    #[test]
    fn test_no_leakage_across_windows() {
        let mut store = AggregationStore::new();
        store.ingest(event("a:1|c")).unwrap();
        store.drain_and_reset(ts());

        store.ingest(event("a:2|c")).unwrap();
        let snapshot = store.drain_and_reset(ts());
        assert_eq!(snapshot.counters()["a"], 2.0);
    }

    #[test]
    fn test_snapshot_serialize() {
        let mut store = AggregationStore::new();
        store.ingest(event("b:3|c")).unwrap();
        store.ingest(event("a:2|ms")).unwrap();
        store.ingest(event("c:4|g")).unwrap();

        let snapshot = store.drain_and_reset(UnixTimestamp::from_secs(42));
        insta::assert_json_snapshot!(snapshot, @r###"
        {
          "timestamp": 42,
          "counters": {
            "b": 3.0
          },
          "timers": {
            "a": {
              "values": [
                2
              ],
              "sum": 2.0
            }
          },
          "gauges": {
            "c": {
              "sum": 4.0,
              "count": 1
            }
          }
        }
        "###);
    }
}
