use std::fmt;
use std::str::FromStr;

use crate::ParseMetricError;

/// Type used for accumulated counter values.
pub type CounterType = f64;

/// Type used for raw timer samples.
pub type TimerType = i64;

/// Type used for accumulated gauge values.
pub type GaugeType = f64;

/// The type of a [`MetricEvent`](crate::MetricEvent), determining how it is aggregated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricType {
    /// Counts instances of an event.
    ///
    /// Counters are summed up within a flush window, corrected for sampling, and reported as a
    /// rate per second.
    ///
    /// Tagged as `c`.
    Counter,
    /// Collects individual duration samples.
    ///
    /// Timers keep every sample of the flush window and report sums, means and upper bounds at
    /// configured percentiles.
    ///
    /// Tagged as `ms`.
    Timer,
    /// Reports a point-in-time value.
    ///
    /// Gauges report the arithmetic mean of all values received within the flush window.
    ///
    /// Tagged as `g`.
    Gauge,
}

impl MetricType {
    /// Return the shortcode for this metric type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Timer => "ms",
            MetricType::Gauge => "g",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = ParseMetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "c" => Self::Counter,
            "ms" => Self::Timer,
            "g" => Self::Gauge,
            _ => return Err(ParseMetricError::UnknownType),
        })
    }
}
