//! Registry-backed task scheduler.
//!
//! The scheduler lives on the controller thread (it is `!Send`). Bodies run
//! on the tokio pool; everything that touches the registry or a callback runs
//! on the controller thread while it pumps events.

use super::bridge::{EventBridge, TaskEvent};
use super::{
    Lifetime, SchedulerError, Task, TaskContext, TaskError, TaskId, TaskKind, TaskOutcome,
    TaskSignal,
};
use crate::metrics::Metrics;
use crate::models::MAX_CONCURRENT_TASKS;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};

type FinishedFn = Box<dyn FnOnce(&TaskOutcome)>;
type ExceptionFn = Box<dyn FnOnce(&TaskError)>;
type SignalFn = Box<dyn FnMut(TaskSignal)>;
type ErrorSurface = Box<dyn FnMut(&TaskError)>;

/// Continuations attached to one submission.
///
/// # Example
/// ```ignore
/// scheduler.submit(
///     FetchQr::new(deps.clone()),
///     Callbacks::new()
///         .on_finished(move |outcome| flow.qr_ready(outcome))
///         .on_exception(|err| tracing::warn!("{err}")),
/// );
/// ```
#[derive(Default)]
pub struct Callbacks {
    on_finished: Option<FinishedFn>,
    on_exception: Option<ExceptionFn>,
    on_signal: Option<SignalFn>,
    quiet: bool,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs once, after the task was removed from the registry.
    pub fn on_finished(mut self, f: impl FnOnce(&TaskOutcome) + 'static) -> Self {
        self.on_finished = Some(Box::new(f));
        self
    }

    /// Runs at most once, before `on_finished`.
    pub fn on_exception(mut self, f: impl FnOnce(&TaskError) + 'static) -> Self {
        self.on_exception = Some(Box::new(f));
        self
    }

    pub fn on_signal(mut self, f: impl FnMut(TaskSignal) + 'static) -> Self {
        self.on_signal = Some(Box::new(f));
        self
    }

    /// Keep failures of this task away from the generic error surface.
    ///
    /// The exception continuation still runs.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }
}

/// Owner-side handle of an accepted submission.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: TaskId,
    kind: TaskKind,
    lifetime: Lifetime,
    stop: Arc<watch::Sender<bool>>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// Ask a long-lived task to leave its loop. No-op for one-shot tasks.
    pub fn stop(&self) {
        if self.lifetime == Lifetime::LongLived {
            self.stop.send_replace(true);
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

struct Entry {
    kind: TaskKind,
    lifetime: Lifetime,
    stop: Arc<watch::Sender<bool>>,
    callbacks: Callbacks,
    failed: bool,
}

#[derive(Default)]
struct Registry {
    by_id: HashMap<TaskId, Entry>,
    by_kind: HashMap<TaskKind, TaskId>,
}

impl Registry {
    fn remove(&mut self, id: TaskId) -> Option<Entry> {
        let entry = self.by_id.remove(&id)?;
        // Only drop the kind slot if it still points at this task.
        if self.by_kind.get(&entry.kind) == Some(&id) {
            self.by_kind.remove(&entry.kind);
        }
        Some(entry)
    }
}

struct Inner {
    bridge: EventBridge,
    semaphore: Arc<Semaphore>,
    registry: RefCell<Registry>,
    next_id: Cell<TaskId>,
    error_surface: RefCell<Option<ErrorSurface>>,
    metrics: Arc<Metrics>,
}

/// Dispatches tasks and routes their events back to the controller thread.
///
/// Cloning yields another handle to the same registry.
///
/// # Guarantees
///
/// - At most one registered task per [`TaskKind`]; a duplicate submission is
///   dropped with a warning and `submit` returns `None`.
/// - Each accepted task yields exactly one `on_finished` call, preceded by at
///   most one `on_exception` call.
/// - Callbacks run on the thread calling [`pump`](Self::pump) /
///   [`drain`](Self::drain) with no registry borrow held, so they may submit
///   or stop tasks.
/// - Writes a body makes to shared state happen-before its callbacks run.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

impl Scheduler {
    pub fn new(tokio_handle: tokio::runtime::Handle) -> Self {
        Self::with_limit(tokio_handle, MAX_CONCURRENT_TASKS)
    }

    /// Scheduler running at most `max_concurrent` bodies at once.
    pub fn with_limit(tokio_handle: tokio::runtime::Handle, max_concurrent: usize) -> Self {
        Self {
            inner: Rc::new(Inner {
                bridge: EventBridge::new(tokio_handle),
                semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
                registry: RefCell::new(Registry::default()),
                next_id: Cell::new(1),
                error_surface: RefCell::new(None),
                metrics: Arc::new(Metrics::new()),
            }),
        }
    }

    pub fn handle(&self) -> &tokio::runtime::Handle {
        self.inner.bridge.handle()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Install the handler every non-quiet task failure is shown through.
    pub fn set_error_surface(&self, surface: impl FnMut(&TaskError) + 'static) {
        *self.inner.error_surface.borrow_mut() = Some(Box::new(surface));
    }

    /// Register and dispatch `task`.
    ///
    /// # Returns
    ///
    /// A handle for the accepted task, or `None` when a task of the same kind
    /// is still registered. The rejection is only logged.
    pub fn submit<T: Task>(&self, task: T, callbacks: Callbacks) -> Option<TaskHandle> {
        self.try_submit_boxed(Box::new(task), callbacks).ok()
    }

    pub fn submit_boxed(&self, task: Box<dyn Task>, callbacks: Callbacks) -> Option<TaskHandle> {
        self.try_submit_boxed(task, callbacks).ok()
    }

    /// Like [`submit`](Self::submit), but reports the rejection.
    pub fn try_submit<T: Task>(
        &self,
        task: T,
        callbacks: Callbacks,
    ) -> Result<TaskHandle, SchedulerError> {
        self.try_submit_boxed(Box::new(task), callbacks)
    }

    pub fn try_submit_boxed(
        &self,
        task: Box<dyn Task>,
        callbacks: Callbacks,
    ) -> Result<TaskHandle, SchedulerError> {
        let kind = task.kind();
        let lifetime = task.lifetime();

        if self.inner.registry.borrow().by_kind.contains_key(&kind) {
            tracing::warn!("Attempting to add {} but one already exists", kind);
            self.inner.metrics.record_rejected();
            return Err(SchedulerError::DuplicateTaskType(kind));
        }

        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);

        let (stop_tx, stop_rx) = watch::channel(false);
        let stop = Arc::new(stop_tx);

        {
            let mut registry = self.inner.registry.borrow_mut();
            registry.by_kind.insert(kind, id);
            registry.by_id.insert(
                id,
                Entry {
                    kind,
                    lifetime,
                    stop: Arc::clone(&stop),
                    callbacks,
                    failed: false,
                },
            );
        }

        self.inner.metrics.record_submitted();
        tracing::info!("{} (#{}) added to task pool", kind, id);

        self.dispatch(id, kind, task, stop_rx);

        Ok(TaskHandle {
            id,
            kind,
            lifetime,
            stop,
        })
    }

    fn dispatch(&self, id: TaskId, kind: TaskKind, task: Box<dyn Task>, stop_rx: watch::Receiver<bool>) {
        let events = self.inner.bridge.sender();
        let ctx = TaskContext::new(id, kind, stop_rx, events.clone());
        let semaphore = Arc::clone(&self.inner.semaphore);

        self.inner.bridge.spawn_async(move || async move {
            // A closed semaphore only happens on shutdown; run unbounded then.
            let _permit = semaphore.acquire_owned().await.ok();
            let started = Instant::now();
            let observer = ctx.clone();

            // Run the body as its own task so a panic surfaces as a JoinError.
            let error = match tokio::spawn(task.run(ctx)).await {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(TaskError::Failed { task: kind, error }),
                Err(join_error) => Some(TaskError::Panicked {
                    task: kind,
                    message: if join_error.is_panic() {
                        panic_message(join_error.into_panic())
                    } else {
                        "task was cancelled".to_string()
                    },
                }),
            };

            if let Some(error) = error {
                events.send(TaskEvent::Exception { id, error });
            }
            events.send(TaskEvent::Finished {
                id,
                stopped: !observer.is_running(),
                elapsed: started.elapsed(),
            });
        });
    }

    /// Stop the live task of `kind`, if it is long-lived.
    pub fn stop(&self, kind: TaskKind) -> bool {
        let registry = self.inner.registry.borrow();
        let Some(entry) = registry
            .by_kind
            .get(&kind)
            .and_then(|id| registry.by_id.get(id))
        else {
            return false;
        };
        if entry.lifetime != Lifetime::LongLived {
            return false;
        }
        entry.stop.send_replace(true);
        tracing::info!("{} asked to stop", kind);
        true
    }

    /// Stop every live long-lived task.
    pub fn stop_all(&self) -> usize {
        let registry = self.inner.registry.borrow();
        let mut stopped = 0;
        for entry in registry.by_id.values() {
            if entry.lifetime == Lifetime::LongLived {
                entry.stop.send_replace(true);
                stopped += 1;
            }
        }
        if stopped > 0 {
            tracing::info!("Stopped {} long-lived task(s)", stopped);
        }
        stopped
    }

    pub fn is_running(&self, kind: TaskKind) -> bool {
        self.inner.registry.borrow().by_kind.contains_key(&kind)
    }

    /// Kinds with a registered task, sorted.
    pub fn live_kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<_> = self.inner.registry.borrow().by_kind.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn is_idle(&self) -> bool {
        self.inner.registry.borrow().by_id.is_empty()
    }

    /// Handle every queued event without waiting. Returns the number handled.
    pub fn drain(&self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.inner.bridge.try_next() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for an event, then handle everything queued.
    pub fn pump(&self, timeout: Duration) -> usize {
        match self.inner.bridge.next_timeout(timeout) {
            Some(event) => {
                self.handle_event(event);
                1 + self.drain()
            }
            None => 0,
        }
    }

    /// Pump until no task is registered or `timeout` elapses.
    ///
    /// Returns whether the scheduler went idle.
    pub fn run_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain();
            if self.is_idle() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.pump(remaining.min(Duration::from_millis(50)));
        }
    }

    fn handle_event(&self, event: TaskEvent) {
        self.inner.metrics.record_event();
        match event {
            TaskEvent::Signal { id, signal } => self.on_signal(id, signal),
            TaskEvent::Exception { id, error } => self.on_exception(id, error),
            TaskEvent::Finished {
                id,
                stopped,
                elapsed,
            } => self.on_finished(id, stopped, elapsed),
        }
    }

    fn on_signal(&self, id: TaskId, signal: TaskSignal) {
        let callback = self
            .inner
            .registry
            .borrow_mut()
            .by_id
            .get_mut(&id)
            .and_then(|entry| entry.callbacks.on_signal.take());

        let Some(mut callback) = callback else {
            tracing::debug!("Dropping {:?} from task #{}", signal, id);
            return;
        };
        callback(signal);

        // Put it back unless the task went away meanwhile.
        if let Some(entry) = self.inner.registry.borrow_mut().by_id.get_mut(&id) {
            entry.callbacks.on_signal.get_or_insert(callback);
        }
    }

    fn on_exception(&self, id: TaskId, error: TaskError) {
        self.inner.metrics.record_failed();
        tracing::error!("{}", error);

        let (callback, quiet) = {
            let mut registry = self.inner.registry.borrow_mut();
            match registry.by_id.get_mut(&id) {
                Some(entry) => {
                    entry.failed = true;
                    (entry.callbacks.on_exception.take(), entry.callbacks.quiet)
                }
                None => (None, false),
            }
        };

        if !quiet {
            let surface = self.inner.error_surface.borrow_mut().take();
            if let Some(mut surface) = surface {
                surface(&error);
                let mut slot = self.inner.error_surface.borrow_mut();
                if slot.is_none() {
                    *slot = Some(surface);
                }
            }
        }
        if let Some(callback) = callback {
            callback(&error);
        }
    }

    fn on_finished(&self, id: TaskId, stopped: bool, elapsed: Duration) {
        let Some(entry) = self.inner.registry.borrow_mut().remove(id) else {
            tracing::debug!("Task #{} already removed", id);
            return;
        };

        self.inner.metrics.record_finished(elapsed, stopped);
        tracing::info!(
            "{} (#{}) removed from task pool after {:.2}s",
            entry.kind,
            id,
            elapsed.as_secs_f64()
        );

        let outcome = TaskOutcome {
            id,
            kind: entry.kind,
            stopped,
            failed: entry.failed,
        };
        if let Some(callback) = entry.callbacks.on_finished {
            callback(&outcome);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
