use std::iter::FusedIterator;

use smallvec::SmallVec;

use crate::{MetricType, TimerType};

/// An error returned by [`MetricEvent::parse`] and [`MetricEvent::parse_all`].
///
/// Each variant corresponds to one validation rule of the line protocol. Parsing stops at the
/// first violated rule, checked in the order of the variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseMetricError {
    /// The line has fewer than two or more than three `|`-separated fields.
    #[error("wrong field count")]
    WrongFieldCount,
    /// The third field does not start with `@` or is not a number in `(0, 1]`.
    #[error("bad sample rate")]
    BadSampleRate,
    /// The first field is not a single `name:value` pair with a non-empty name.
    #[error("bad name:value pair")]
    BadNameValue,
    /// The value is not a signed 64-bit integer.
    #[error("non-numeric value")]
    NonNumericValue,
    /// The type tag is not one of `c`, `ms` or `g`.
    #[error("unknown type")]
    UnknownType,
    /// The line is not valid UTF-8.
    #[error("invalid utf-8")]
    InvalidUtf8,
}

/// A single metric submitted by a client.
///
/// Events are created from the line protocol, see the [crate documentation](crate) for the
/// format. They are consumed exactly once by the [`AggregationStore`](crate::AggregationStore).
#[derive(Clone, Debug, PartialEq)]
pub struct MetricEvent {
    /// The name of the metric, without prefixes.
    pub name: String,
    /// The type of the metric, which determines its aggregation.
    pub ty: MetricType,
    /// The reported integer value.
    pub value: TimerType,
    /// The fraction of events represented by this one, in `(0, 1]`.
    pub sample_rate: f64,
}

impl MetricEvent {
    /// Parses a single metric line.
    ///
    /// A single trailing carriage return is tolerated.
    ///
    /// # Example
    ///
    /// ```
    /// use yastatsd_metrics::{MetricEvent, MetricType};
    ///
    /// let event = MetricEvent::parse(b"requests:3|c|@0.5").unwrap();
    /// assert_eq!(event.name, "requests");
    /// assert_eq!(event.ty, MetricType::Counter);
    /// assert_eq!(event.value, 3);
    /// assert_eq!(event.sample_rate, 0.5);
    /// ```
    pub fn parse(line: &[u8]) -> Result<Self, ParseMetricError> {
        let string = std::str::from_utf8(line).map_err(|_| ParseMetricError::InvalidUtf8)?;
        Self::parse_str(string.strip_suffix('\r').unwrap_or(string))
    }

    /// Parses a set of metric lines from a datagram payload.
    ///
    /// Lines are separated by newlines. Empty lines are skipped. A line that fails to parse
    /// yields an error without affecting the remaining lines.
    ///
    /// # Example
    ///
    /// ```
    /// use yastatsd_metrics::MetricEvent;
    ///
    /// let payload = b"a:5|c\nbroken\n\nb:100|ms\n";
    /// let results: Vec<_> = MetricEvent::parse_all(payload).collect();
    ///
    /// assert_eq!(results.len(), 3);
    /// assert!(results[0].is_ok());
    /// assert!(results[1].is_err());
    /// assert!(results[2].is_ok());
    /// ```
    pub fn parse_all(payload: &[u8]) -> ParseMetricEvents<'_> {
        ParseMetricEvents { slice: payload }
    }

    fn parse_str(string: &str) -> Result<Self, ParseMetricError> {
        let fields: SmallVec<[&str; 4]> = string.splitn(4, '|').collect();

        let (pair, ty, sample_rate) = match fields.as_slice() {
            [pair, ty] => (*pair, *ty, 1.0),
            [pair, ty, sample_rate] => (*pair, *ty, parse_sample_rate(sample_rate)?),
            _ => return Err(ParseMetricError::WrongFieldCount),
        };

        let mut parts = pair.split(':');
        let (name, raw_value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(raw_value), None) => (name, raw_value),
            _ => return Err(ParseMetricError::BadNameValue),
        };

        let value = raw_value
            .parse()
            .map_err(|_| ParseMetricError::NonNumericValue)?;

        Ok(Self {
            name: name.to_owned(),
            ty: ty.parse()?,
            value,
            sample_rate,
        })
    }
}

fn parse_sample_rate(string: &str) -> Result<f64, ParseMetricError> {
    let rate: f64 = string
        .strip_prefix('@')
        .and_then(|rate| rate.parse().ok())
        .ok_or(ParseMetricError::BadSampleRate)?;

    // Also rejects NaN.
    if rate > 0.0 && rate <= 1.0 {
        Ok(rate)
    } else {
        Err(ParseMetricError::BadSampleRate)
    }
}

/// Iterator over parsed metrics returned from [`MetricEvent::parse_all`].
#[derive(Clone, Debug, Default)]
pub struct ParseMetricEvents<'a> {
    slice: &'a [u8],
}

impl<'a> ParseMetricEvents<'a> {
    /// Returns the next non-empty line together with its parse result.
    ///
    /// This is useful to log the offending line when parsing fails.
    pub fn next_with_line(&mut self) -> Option<(&'a [u8], Result<MetricEvent, ParseMetricError>)> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut split = self.slice.splitn(2, |&b| b == b'\n');
            let current = split.next()?;
            self.slice = split.next().unwrap_or_default();

            if !current.is_empty() && current != b"\r" {
                return Some((current, MetricEvent::parse(current)));
            }
        }
    }
}

impl Iterator for ParseMetricEvents<'_> {
    type Item = Result<MetricEvent, ParseMetricError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_with_line().map(|(_, result)| result)
    }
}

impl FusedIterator for ParseMetricEvents<'_> {}
