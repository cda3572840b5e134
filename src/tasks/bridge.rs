// EventBridge - Coordinates between the tokio worker pool and the controller thread
//
// Task bodies run on tokio's multi-threaded runtime. Their completions,
// failures and signals must be observed on the single controller thread that
// owns the registry and every callback. The bridge provides:
// - Spawning async work onto the runtime from the controller thread
// - A channel that workers push task events into
// - Draining that channel on the controller thread, with or without waiting

use super::{TaskError, TaskId, TaskSignal};
use std::cell::RefCell;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Notification sent from a worker to the controller thread.
#[derive(Debug)]
pub enum TaskEvent {
    Signal {
        id: TaskId,
        signal: TaskSignal,
    },
    Exception {
        id: TaskId,
        error: TaskError,
    },
    /// Terminal event, sent exactly once per task after its body returned.
    Finished {
        id: TaskId,
        stopped: bool,
        elapsed: Duration,
    },
}

/// Worker-side end of the event channel.
///
/// Cheap to clone; every task context carries one.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<TaskEvent>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: TaskEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::warn!("Failed to deliver task event - controller has stopped: {:?}", e.0);
        }
    }
}

/// Controller-side end of the event channel plus the runtime handle
///
/// The channel is unbounded: terminal events must never be dropped, and the
/// number of in-flight events is bounded by the number of live tasks.
///
/// # Example
/// ```ignore
/// let runtime = tokio::runtime::Runtime::new()?;
/// let bridge = EventBridge::new(runtime.handle().clone());
/// let events = bridge.sender();
///
/// bridge.spawn_async(move || async move {
///     // ... task body ...
///     events.send(TaskEvent::Finished { id, stopped: false, elapsed });
/// });
///
/// while let Some(event) = bridge.next_timeout(Duration::from_millis(100)) {
///     // handled on the controller thread
/// }
/// ```
pub struct EventBridge {
    /// Handle to the tokio runtime for spawning task bodies
    tokio_handle: tokio::runtime::Handle,

    event_tx: mpsc::UnboundedSender<TaskEvent>,

    event_rx: RefCell<mpsc::UnboundedReceiver<TaskEvent>>,
}

impl EventBridge {
    /// Create a new EventBridge
    ///
    /// # Arguments
    /// * `tokio_handle` - Handle to the runtime task bodies run on
    pub fn new(tokio_handle: tokio::runtime::Handle) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            tokio_handle,
            event_tx,
            event_rx: RefCell::new(event_rx),
        }
    }

    pub fn handle(&self) -> &tokio::runtime::Handle {
        &self.tokio_handle
    }

    /// A sender for worker-side code
    pub fn sender(&self) -> EventSender {
        EventSender::new(self.event_tx.clone())
    }

    /// Spawn an async task on the tokio runtime from the controller thread
    ///
    /// # Arguments
    /// * `future_factory` - A function that produces a Future to execute on tokio
    pub fn spawn_async<F, Fut>(&self, future_factory: F) -> JoinHandle<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tokio_handle.spawn(async move {
            future_factory().await;
        })
    }

    /// Next queued event, without waiting
    pub fn try_next(&self) -> Option<TaskEvent> {
        self.event_rx.borrow_mut().try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    ///
    /// Blocks the calling thread. Must not be called from inside the runtime.
    pub fn next_timeout(&self, timeout: Duration) -> Option<TaskEvent> {
        if let Some(event) = self.try_next() {
            return Some(event);
        }
        let mut event_rx = self.event_rx.borrow_mut();
        self.tokio_handle.block_on(async {
            tokio::time::timeout(timeout, event_rx.recv())
                .await
                .ok()
                .flatten()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_events_arrive_in_send_order() {
        let rt = runtime();
        let bridge = EventBridge::new(rt.handle().clone());
        let events = bridge.sender();

        bridge.spawn_async(move || async move {
            events.send(TaskEvent::Signal {
                id: 1,
                signal: crate::tasks::TaskSignal::QrScanned,
            });
            events.send(TaskEvent::Finished {
                id: 1,
                stopped: false,
                elapsed: Duration::ZERO,
            });
        });

        let first = bridge.next_timeout(Duration::from_secs(2));
        let second = bridge.next_timeout(Duration::from_secs(2));
        assert!(matches!(first, Some(TaskEvent::Signal { id: 1, .. })));
        assert!(matches!(second, Some(TaskEvent::Finished { id: 1, .. })));
    }

    #[test]
    fn test_next_timeout_expires_without_events() {
        let rt = runtime();
        let bridge = EventBridge::new(rt.handle().clone());

        assert!(bridge.try_next().is_none());
        assert!(bridge.next_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_async_spawn() {
        let rt = runtime();
        let bridge = EventBridge::new(rt.handle().clone());
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = counter.clone();
        let handle = bridge.spawn_async(move || async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        rt.block_on(handle).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_after_bridge_dropped() {
        let rt = runtime();
        let bridge = EventBridge::new(rt.handle().clone());
        let sender = bridge.sender();
        drop(bridge);

        // Logged and dropped, never panics.
        sender.send(TaskEvent::Exception {
            id: 3,
            error: TaskError::Panicked {
                task: TaskKind::FetchQr,
                message: "late".into(),
            },
        });
    }
}
