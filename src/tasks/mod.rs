//! Background task execution.
//!
//! A [`Task`] is one run of a network-bound operation. The [`Scheduler`]
//! dispatches tasks onto the tokio worker pool, keeps at most one live task
//! per [`TaskKind`], and hands every completion, failure and signal back to
//! the controller thread through the [`EventBridge`].
//!
//! # Lifecycle
//!
//! ```text
//! submit ──► registered ──► body runs on a worker ──► [Exception] ──► Finished ──► removed
//!                 │                     │
//!                 └── duplicate kind:   └── Signal* (long-lived tasks, zero or more)
//!                     dropped, logged
//! ```
//!
//! Every accepted task produces exactly one `Finished` event. A failing body
//! produces one `Exception` event first.

pub mod bridge;
pub mod scheduler;

pub use bridge::{EventBridge, EventSender, TaskEvent};
pub use scheduler::{Callbacks, Scheduler, TaskHandle};

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Unique id of one submitted task; never reused within a process.
pub type TaskId = u64;

/// Type identifier used for exclusivity: one live task per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    CredentialManager,
    FetchQr,
    PollLogin,
    FetchArea,
    FetchRoom,
    FetchAnnounce,
    ConstUpdate,
    RoomStatusCheck,
    VersionCheck,
    FetchUsernames,
    StartLive,
    StopLive,
    UpdateTitle,
    UpdateAnnounce,
    UpdateArea,
    LoadRecentTitles,
    FetchRecentAreas,
}

impl TaskKind {
    /// Display name used in logs and error titles.
    pub fn name(self) -> &'static str {
        match self {
            Self::CredentialManager => "Credential manager",
            Self::FetchQr => "QR code",
            Self::PollLogin => "Login",
            Self::FetchArea => "Area list",
            Self::FetchRoom => "Room info",
            Self::FetchAnnounce => "Announcement",
            Self::ConstUpdate => "Constants update",
            Self::RoomStatusCheck => "Room status",
            Self::VersionCheck => "Version check",
            Self::FetchUsernames => "Username update",
            Self::StartLive => "Start live",
            Self::StopLive => "Stop live",
            Self::UpdateTitle => "Title update",
            Self::UpdateAnnounce => "Announcement update",
            Self::UpdateArea => "Area update",
            Self::LoadRecentTitles => "Recent titles",
            Self::FetchRecentAreas => "Recent areas",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a task runs once or loops until stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    #[default]
    OneShot,
    LongLived,
}

/// Intermediate notification a task sends to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSignal {
    QrNotConfirmed,
    QrExpired,
    QrScanned,
    NewVersion(String),
}

/// Rejected submission.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("A {0} task is already running")]
    DuplicateTaskType(TaskKind),
}

/// Failure of a task body, captured as data.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("{task} failed: {error:#}")]
    Failed { task: TaskKind, error: anyhow::Error },

    #[error("{task} panicked: {message}")]
    Panicked { task: TaskKind, message: String },
}

impl TaskError {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Failed { task, .. } | Self::Panicked { task, .. } => *task,
        }
    }

    /// Typed error the body returned, if it is an `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Self::Failed { error, .. } => error.downcast_ref::<E>(),
            Self::Panicked { .. } => None,
        }
    }
}

/// What the owner learns when a task is removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOutcome {
    pub id: TaskId,
    pub kind: TaskKind,
    /// The task had been asked to stop before its body returned.
    pub stopped: bool,
    /// An exception was reported for this task.
    pub failed: bool,
}

/// Per-run handle passed to a task body.
#[derive(Clone)]
pub struct TaskContext {
    id: TaskId,
    kind: TaskKind,
    stop_rx: watch::Receiver<bool>,
    events: EventSender,
}

impl TaskContext {
    pub(crate) fn new(
        id: TaskId,
        kind: TaskKind,
        stop_rx: watch::Receiver<bool>,
        events: EventSender,
    ) -> Self {
        Self {
            id,
            kind,
            stop_rx,
            events,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// False once the owner called `stop()`. Check it at every loop boundary
    /// and after every remote call, before touching shared state.
    pub fn is_running(&self) -> bool {
        !*self.stop_rx.borrow()
    }

    pub fn emit(&self, signal: TaskSignal) {
        self.events.send(TaskEvent::Signal {
            id: self.id,
            signal,
        });
    }

    /// Sleep for `duration`, waking early on `stop()`.
    ///
    /// Returns whether the task is still running.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        let mut stop_rx = self.stop_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = wait_for_stop(&mut stop_rx) => {}
        }
        self.is_running()
    }
}

async fn wait_for_stop(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow_and_update() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            // Sender gone: nobody can stop us any more.
            std::future::pending::<()>().await;
        }
    }
}

/// One unit of background work.
///
/// # Example
/// ```ignore
/// struct FetchAnnounce { deps: TaskDeps }
///
/// #[async_trait]
/// impl Task for FetchAnnounce {
///     fn kind(&self) -> TaskKind { TaskKind::FetchAnnounce }
///
///     async fn run(self: Box<Self>, ctx: TaskContext) -> anyhow::Result<()> {
///         let text = self.deps.api.announce(&cookies).await?;
///         // ...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + 'static {
    fn kind(&self) -> TaskKind;

    fn lifetime(&self) -> Lifetime {
        Lifetime::OneShot
    }

    async fn run(self: Box<Self>, ctx: TaskContext) -> anyhow::Result<()>;
}
