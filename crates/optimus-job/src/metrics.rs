//! Observability metrics for the replay engine.
//!
//! Metrics are exported through the `metrics` crate facade; wire up an
//! exporter (e.g. `metrics_exporter_prometheus`) in the binary that hosts
//! the engine.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `optimus_replay_requests_total` | Counter | `status` | Replay submissions by outcome |
//! | `optimus_replay_dispatch_seconds` | Histogram | - | Clear-call fan-out duration per replay |
//! | `optimus_replay_synced_total` | Counter | - | Completed synchronizer passes |
//! | `optimus_deploy_jobs_total` | Counter | `status` | Deploy operations by outcome |
//! | `optimus_resolve_seconds` | Histogram | `resolver` | Dependency/priority resolution duration |

use std::time::{Duration, Instant};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: replay submissions by outcome.
    pub const REPLAY_REQUESTS_TOTAL: &str = "optimus_replay_requests_total";
    /// Histogram: clear-call fan-out duration per replay in seconds.
    pub const REPLAY_DISPATCH_SECONDS: &str = "optimus_replay_dispatch_seconds";
    /// Counter: completed synchronizer passes.
    pub const REPLAY_SYNCED_TOTAL: &str = "optimus_replay_synced_total";
    /// Counter: deploy operations by outcome.
    pub const DEPLOY_JOBS_TOTAL: &str = "optimus_deploy_jobs_total";
    /// Histogram: resolution duration in seconds.
    pub const RESOLVE_SECONDS: &str = "optimus_resolve_seconds";
}

/// Label keys used across metrics.
pub mod labels {
    /// Outcome status (accepted, rejected, success, failed).
    pub const STATUS: &str = "status";
    /// Which resolver ran (dependency, priority).
    pub const RESOLVER: &str = "resolver";
}

/// RAII guard for timing operations.
///
/// Automatically records the elapsed duration when dropped.
///
/// ## Example
///
/// ```rust,no_run
/// use metrics::histogram;
/// use optimus_job::metrics::{names, TimingGuard};
///
/// let _guard = TimingGuard::new(|duration| {
///     histogram!(names::REPLAY_DISPATCH_SECONDS).record(duration.as_secs_f64());
/// });
/// // Do work... duration recorded on drop.
/// ```
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a timing guard that calls `on_drop` with the elapsed duration.
    #[must_use]
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
