use crate::TimerValue;

/// Sum, mean and upper bound over a set of timer samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimerSummary {
    /// The sum of the included samples.
    pub sum: f64,
    /// The arithmetic mean of the included samples.
    pub mean: f64,
    /// The largest included sample.
    pub upper: f64,
}

/// Statistics of the lowest samples of a timer, up to a percentile threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PercentileStats {
    /// The percentile threshold in `1..=100`.
    pub threshold: u8,
    /// Statistics over the smallest samples falling into the threshold.
    pub summary: TimerSummary,
}

/// Derived statistics of a single timer for one flush window.
#[derive(Clone, Debug, PartialEq)]
pub struct TimerStats {
    /// One entry per configured threshold, in configuration order.
    pub percentiles: Vec<PercentileStats>,
    /// Statistics over all samples of the window.
    pub total: TimerSummary,
}

impl TimerStats {
    /// Computes percentile and whole-window statistics for a timer.
    ///
    /// For every threshold `P`, the `k = ceil(N * P / 100)` smallest samples are selected, with
    /// `k` clamped to `1..=N`. This is the "lower percentile" convention: `P = 50` selects the
    /// lower half. Duplicate samples are all eligible for selection.
    ///
    /// Returns `None` if the timer has no samples.
    ///
    /// # Example
    ///
    /// ```
    /// use yastatsd_metrics::{TimerStats, TimerValue};
    ///
    /// let timer: TimerValue = (1..=100).collect();
    /// let stats = TimerStats::compute(&timer, &[90]).unwrap();
    ///
    /// assert_eq!(stats.percentiles[0].summary.upper, 90.0);
    /// assert_eq!(stats.total.upper, 100.0);
    /// ```
    pub fn compute(timer: &TimerValue, thresholds: &[u8]) -> Option<Self> {
        let mut sorted = timer.values().to_vec();
        sorted.sort_unstable();

        let upper = *sorted.last()?;
        let count = sorted.len();

        // prefix_sums[k] is the sum of the k smallest samples.
        let prefix_sums: Vec<f64> = std::iter::once(0.0)
            .chain(sorted.iter().scan(0.0, |sum, &value| {
                *sum += value as f64;
                Some(*sum)
            }))
            .collect();

        let percentiles = thresholds
            .iter()
            .map(|&threshold| {
                let k = lower_count(count, threshold);
                let sum = prefix_sums[k];

                PercentileStats {
                    threshold,
                    summary: TimerSummary {
                        sum,
                        mean: sum / k as f64,
                        upper: sorted[k - 1] as f64,
                    },
                }
            })
            .collect();

        let total = TimerSummary {
            sum: timer.sum(),
            mean: timer.sum() / count as f64,
            upper: upper as f64,
        };

        Some(Self { percentiles, total })
    }
}

/// Returns the number of smallest samples included at the given percentile threshold.
///
/// This is `ceil(count * threshold / 100)`, clamped to `1..=count`. `count` must not be zero.
pub fn lower_count(count: usize, threshold: u8) -> usize {
    (count * usize::from(threshold))
        .div_ceil(100)
        .clamp(1, count.max(1))
}
