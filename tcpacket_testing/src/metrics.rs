//! Metrics capture for tests.
//!
//! Metric helpers record through the thread-local recorder, so only
//! synchronous code run inside [`MetricsCapture::record`] is observed.
//! Taking a snapshot drains the recorded counters; read every value needed
//! from one [`MetricsSnapshot`].

use metrics_util::{
    CompositeKey,
    debugging::{DebugValue, DebuggingRecorder, Snapshotter},
};

/// A debugging recorder paired with its snapshotter.
pub struct MetricsCapture {
    recorder: DebuggingRecorder,
    snapshotter: Snapshotter,
}

/// Create a fresh [`MetricsCapture`].
#[must_use]
pub fn capture_metrics() -> MetricsCapture {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    MetricsCapture {
        recorder,
        snapshotter,
    }
}

impl MetricsCapture {
    /// Run `f` with this capture installed as the local recorder.
    pub fn record<T>(&self, f: impl FnOnce() -> T) -> T {
        ::metrics::with_local_recorder(&self.recorder, f)
    }

    /// Values recorded since the previous snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            values: self
                .snapshotter
                .snapshot()
                .into_vec()
                .into_iter()
                .map(|(key, _, _, value)| (key, value))
                .collect(),
        }
    }
}

/// Metric values taken from a [`MetricsCapture`] at one point in time.
pub struct MetricsSnapshot {
    values: Vec<(CompositeKey, DebugValue)>,
}

impl MetricsSnapshot {
    /// Value of the counter `name` whose labels include every pair in
    /// `labels`, summed over matching series.
    #[must_use]
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.values
            .iter()
            .filter(|(key, _)| {
                key.key().name() == name
                    && labels.iter().all(|(k, v)| {
                        key.key()
                            .labels()
                            .any(|label| label.key() == *k && label.value() == *v)
                    })
            })
            .map(|(_, value)| match value {
                DebugValue::Counter(count) => *count,
                _ => 0,
            })
            .sum()
    }

    /// Value of the gauge `name`, if recorded.
    #[must_use]
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(key, _)| key.key().name() == name)
            .and_then(|(_, value)| match value {
                DebugValue::Gauge(gauge) => Some(gauge.into_inner()),
                _ => None,
            })
    }
}
