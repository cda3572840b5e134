//! Task bodies.
//!
//! Each type here implements [`Task`](crate::tasks::Task) for one
//! [`TaskKind`](crate::tasks::TaskKind). Bodies read and write
//! [`SharedState`] and talk to the platform through [`PlatformApi`]; they
//! never touch the registry or the presenter. Results that drive the login
//! flow are left in shared state for the owner's `on_finished` continuation.

pub mod constants;
pub mod credentials;
pub mod live;
pub mod login;
pub mod room;
pub mod room_edit;
pub mod usernames;

pub use constants::{ConstUpdate, VersionCheck, is_newer_version};
pub use credentials::CredentialManager;
pub use live::{StartLive, StopLive};
pub use login::{FetchQr, PollLogin};
pub use room::{FetchAnnounce, FetchArea, FetchRoom, RoomStatusCheck};
pub use room_edit::{FetchRecentAreas, LoadRecentTitles, UpdateAnnounce, UpdateArea, UpdateTitle};
pub use usernames::FetchUsernames;

use crate::config::ConfigManager;
use crate::credentials::CredentialStore;
use crate::services::PlatformApi;
use crate::state::SharedState;
use crate::tasks::TaskKind;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default delay between QR poll requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default delay between identity calls for different stored accounts.
pub const DEFAULT_REQUEST_SPACING: Duration = Duration::from_secs(1);

/// Everything a task body may use, shared by `Arc`.
#[derive(Clone)]
pub struct TaskDeps {
    pub state: Arc<SharedState>,
    pub api: Arc<dyn PlatformApi>,
    pub store: Arc<CredentialStore>,
    pub config: Arc<ConfigManager>,
    pub poll_interval: Duration,
    pub request_spacing: Duration,
}

impl TaskDeps {
    pub fn new(
        state: Arc<SharedState>,
        api: Arc<dyn PlatformApi>,
        store: Arc<CredentialStore>,
        config: Arc<ConfigManager>,
    ) -> Self {
        Self {
            state,
            api,
            store,
            config,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_spacing: DEFAULT_REQUEST_SPACING,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_request_spacing(mut self, request_spacing: Duration) -> Self {
        self.request_spacing = request_spacing;
        self
    }

    /// True once the session `epoch` was taken from has been reset.
    fn superseded(&self, epoch: u64, kind: TaskKind) -> bool {
        if self.state.is_current(epoch) {
            return false;
        }
        tracing::info!("Discarding {} result from an earlier session", kind);
        true
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    #[error("QR login rejected ({code}): {message}")]
    Rejected { code: i64, message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Room status check failed ({code}): {message}")]
pub struct RoomStatusError {
    pub code: i64,
    pub message: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartLiveError {
    #[error("Room id is unknown, room info has not been fetched")]
    NoRoom,

    #[error("No live area selected")]
    NoArea,

    #[error("Session has no csrf token")]
    MissingCsrf,

    #[error("Start live rejected ({code}): {message}")]
    Rejected { code: i64, message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StopLiveError {
    #[error("Room id is unknown, room info has not been fetched")]
    NoRoom,

    #[error("Session has no csrf token")]
    MissingCsrf,

    #[error("Stop live rejected ({code}): {message}")]
    Rejected { code: i64, message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomEditError {
    #[error("Room id is unknown, room info has not been fetched")]
    NoRoom,

    #[error("Session has no csrf token")]
    MissingCsrf,

    #[error("Title is empty")]
    EmptyTitle,

    #[error("Area {0} is not in the area list")]
    UnknownArea(String),

    #[error("Change rejected ({code}): {message}")]
    Rejected { code: i64, message: String },
}
