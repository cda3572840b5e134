// Task metrics module
//
// Lightweight counters for the scheduler, logged on shutdown

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Scheduler metrics
///
/// Uses atomic operations so worker-side and controller-side code can record
/// without locks. The scheduler owns one instance and logs it on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Submissions accepted into the registry
    pub tasks_submitted: AtomicU64,

    /// Submissions dropped because a task of the same kind was live
    pub tasks_rejected: AtomicU64,

    /// Terminal events observed (every accepted task produces exactly one)
    pub tasks_finished: AtomicU64,

    /// Tasks whose body returned an error or panicked
    pub tasks_failed: AtomicU64,

    /// Long-lived tasks that ended after `stop()`
    pub tasks_stopped: AtomicU64,

    /// Events pulled off the channel by the controller
    pub events_dispatched: AtomicU64,

    /// Total time spent in task bodies in milliseconds
    pub total_task_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_rejected: AtomicU64::new(0),
            tasks_finished: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_stopped: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            total_task_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a terminal event and the time its body ran
    pub fn record_finished(&self, elapsed: Duration, stopped: bool) {
        self.tasks_finished.fetch_add(1, Ordering::Relaxed);
        if stopped {
            self.tasks_stopped.fetch_add(1, Ordering::Relaxed);
        }
        self.total_task_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average body duration in milliseconds
    pub fn avg_task_time_ms(&self) -> f64 {
        let total = self.total_task_time_ms.load(Ordering::Relaxed);
        let count = self.tasks_finished.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Task Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Tasks: {} submitted, {} rejected, {} finished ({} failed, {} stopped)",
            self.tasks_submitted.load(Ordering::Relaxed),
            self.tasks_rejected.load(Ordering::Relaxed),
            self.tasks_finished.load(Ordering::Relaxed),
            self.tasks_failed.load(Ordering::Relaxed),
            self.tasks_stopped.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Task time: {:.2}s total (avg: {:.2}ms per task), events dispatched: {}",
            self.total_task_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_task_time_ms(),
            self.events_dispatched.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
