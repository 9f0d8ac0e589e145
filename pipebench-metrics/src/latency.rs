use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramSummary {
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p99: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub count: u64,
}

pub(crate) fn new_default_histogram() -> Histogram<u64> {
    // Microseconds, up to one hour.
    match Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

/// Values are reported in milliseconds.
pub(crate) fn summarize_histogram(h: &Histogram<u64>) -> HistogramSummary {
    let count = h.len();
    let ms = |us: u64| us as f64 / 1000.0;

    HistogramSummary {
        p50: (count > 0).then(|| ms(h.value_at_quantile(0.50))),
        p90: (count > 0).then(|| ms(h.value_at_quantile(0.90))),
        p99: (count > 0).then(|| ms(h.value_at_quantile(0.99))),
        min: (count > 0).then(|| ms(h.min())),
        max: (count > 0).then(|| ms(h.max())),
        mean: (count > 0).then(|| h.mean() / 1000.0),
        count,
    }
}

/// Shared latency histogram for scenario iterations.
#[derive(Debug)]
pub struct LatencyRecorder {
    inner: Mutex<Histogram<u64>>,
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self {
            inner: Mutex::new(new_default_histogram()),
        }
    }
}

impl LatencyRecorder {
    pub fn record(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros())
            .unwrap_or(u64::MAX)
            .max(1);
        let _ = self.inner.lock().saturating_record(us);
    }

    pub fn summary(&self) -> HistogramSummary {
        summarize_histogram(&self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_recorder_has_no_stats() {
        let s = LatencyRecorder::default().summary();
        assert_eq!(s.count, 0);
        assert!(s.p50.is_none());
        assert!(s.max.is_none());
        assert!(s.mean.is_none());
    }

    #[test]
    fn recorder_reports_milliseconds() {
        let rec = LatencyRecorder::default();
        rec.record(Duration::from_millis(10));
        rec.record(Duration::from_millis(20));
        rec.record(Duration::from_millis(30));

        let s = rec.summary();
        assert_eq!(s.count, 3);
        let min = s.min.unwrap_or_default();
        let max = s.max.unwrap_or_default();
        assert!((min - 10.0).abs() < 0.1, "min={min}");
        assert!((max - 30.0).abs() < 0.1, "max={max}");
        assert!(s.p99.is_some());
    }
}
