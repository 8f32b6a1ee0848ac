//! モデル読み込みの進捗通知
//!
//! 進捗は `[0, 1]` の単調増加値で、完了時に必ず `1.0` が通知されます。

use std::sync::{Arc, Mutex};
use tracing::info;

pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f32);
}

impl<F> ProgressSink for F
where
    F: Fn(f32) + Send + Sync,
{
    fn report(&self, fraction: f32) {
        self(fraction)
    }
}

/// 何もしない
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _fraction: f32) {}
}

/// tracingのinfoログに出力
#[derive(Debug, Clone, Default)]
pub struct LogProgress {
    pub label: String,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressSink for LogProgress {
    fn report(&self, fraction: f32) {
        info!("[{}] 読み込み進捗: {:.0}%", self.label, fraction * 100.0);
    }
}

/// 値を `[0, 1]` に丸め、前回以下の値は通知しない
pub(crate) struct Monotonic {
    inner: Arc<dyn ProgressSink>,
    last: Mutex<Option<f32>>,
}

impl Monotonic {
    pub(crate) fn new(inner: Arc<dyn ProgressSink>) -> Self {
        Self {
            inner,
            last: Mutex::new(None),
        }
    }
}

impl ProgressSink for Monotonic {
    fn report(&self, fraction: f32) {
        if fraction.is_nan() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if matches!(*last, Some(prev) if fraction <= prev) {
            return;
        }
        *last = Some(fraction);
        self.inner.report(fraction);
    }
}

/// `[0, 1]` を `[start, end]` に写して通知
pub(crate) struct Scaled {
    inner: Arc<dyn ProgressSink>,
    start: f32,
    end: f32,
}

impl Scaled {
    pub(crate) fn new(inner: Arc<dyn ProgressSink>, start: f32, end: f32) -> Self {
        Self { inner, start, end }
    }
}

impl ProgressSink for Scaled {
    fn report(&self, fraction: f32) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.inner
            .report(self.start + (self.end - self.start) * fraction);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 通知された値を記録するテスト用シンク
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub values: Mutex<Vec<f32>>,
    }

    impl Recorder {
        pub fn values(&self) -> Vec<f32> {
            self.values.lock().unwrap().clone()
        }
    }

    impl ProgressSink for Recorder {
        fn report(&self, fraction: f32) {
            self.values.lock().unwrap().push(fraction);
        }
    }

    #[test]
    fn test_monotonic_drops_regressions() {
        let recorder = Arc::new(Recorder::default());
        let sink = Monotonic::new(recorder.clone());
        for v in [0.3, 0.2, 0.3, 0.7, 1.5, 1.0, f32::NAN] {
            sink.report(v);
        }
        assert_eq!(recorder.values(), vec![0.3, 0.7, 1.0]);
    }

    #[test]
    fn test_scaled_maps_range() {
        let recorder = Arc::new(Recorder::default());
        let sink = Scaled::new(recorder.clone(), 0.0, 0.5);
        sink.report(0.0);
        sink.report(1.0);
        assert_eq!(recorder.values(), vec![0.0, 0.5]);
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = move |v: f32| seen_clone.lock().unwrap().push(v);
        sink.report(1.0);
        assert_eq!(*seen.lock().unwrap(), vec![1.0]);
    }
}
