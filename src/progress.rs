use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::PlanError;

/// Fire-and-forget receiver for `(stage, percent)` updates. Implementations
/// must not block: a slow transport should drop updates, not stall the run.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, stage: &str, percent: f32);
}

pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _stage: &str, _percent: f32) {}
}

/// Sink that narrates progress through tracing.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn emit(&self, stage: &str, percent: f32) {
        tracing::info!(stage, percent, "progress");
    }
}

/// Cooperative cancellation flag, checked at stage boundaries and once per
/// viewshed candidate.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn ensure_active(&self) -> Result<(), PlanError> {
        if self.is_cancelled() {
            Err(PlanError::Cancelled)
        } else {
            Ok(())
        }
    }
}

const MIN_EMIT_INTERVAL: Duration = Duration::from_millis(250);

/// Rate-limited wrapper around a sink. Stage boundaries always go through;
/// fractional updates are bounded to a few per second.
pub(crate) struct Reporter<'a> {
    sink: &'a dyn ProgressSink,
    last: Mutex<Instant>,
}

impl<'a> Reporter<'a> {
    pub(crate) fn new(sink: &'a dyn ProgressSink) -> Self {
        let now = Instant::now();
        Self {
            sink,
            last: Mutex::new(now.checked_sub(MIN_EMIT_INTERVAL).unwrap_or(now)),
        }
    }

    pub(crate) fn stage(&self, stage: &str, percent: f32) {
        self.sink.emit(stage, percent);
        if let Ok(mut last) = self.last.lock() {
            *last = Instant::now();
        }
    }

    pub(crate) fn fraction(&self, stage: &str, percent: f32) {
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        if last.elapsed() < MIN_EMIT_INTERVAL {
            return;
        }
        *last = Instant::now();
        drop(last);
        self.sink.emit(stage, percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting(AtomicUsize);

    impl ProgressSink for Counting {
        fn emit(&self, _stage: &str, _percent: f32) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn cancel_token_trips_once_set() {
        let token = CancelToken::new();
        assert!(token.ensure_active().is_ok());
        token.cancel();
        assert!(matches!(token.ensure_active(), Err(PlanError::Cancelled)));
        // Clones observe the same flag.
        assert!(token.clone().is_cancelled());
    }

    #[test]
    fn fractional_updates_are_rate_limited() {
        let sink = Counting(AtomicUsize::new(0));
        let reporter = Reporter::new(&sink);
        for i in 0..100 {
            reporter.fraction("viewshed", i as f32);
        }
        // The first one passes, the burst right after it is swallowed.
        assert!(sink.0.load(Ordering::Relaxed) <= 2);
    }

    #[test]
    fn stage_updates_always_pass() {
        let sink = Counting(AtomicUsize::new(0));
        let reporter = Reporter::new(&sink);
        reporter.stage("crs", 5.0);
        reporter.stage("raster", 30.0);
        assert_eq!(sink.0.load(Ordering::Relaxed), 2);
    }
}
