// Presenter - the view seam of the controller
//
// The controller and the login flow never draw anything themselves. They
// describe what changed as a ViewEvent and hand it to a Presenter, which can be
// a window, a tray icon, or (in the headless runner) the log.

use crate::models::RecentArea;
use std::cell::RefCell;
use std::fmt;

/// Short status-line hints shown next to the QR code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginHint {
    /// Loading stored credentials.
    Loading,
    /// QR code shown, waiting for a scan.
    WaitingForScan,
    /// Scanned, waiting for confirmation on the phone.
    WaitingForConfirm,
    /// QR code expired; a retry is needed.
    QrExpired,
    /// QR generation or polling failed; a retry is offered.
    Retry,
    /// Stored credentials could not be used.
    LoginError,
    /// Logged in, post-login data still loading.
    LoadingRoom,
}

impl LoginHint {
    pub fn text(self) -> &'static str {
        match self {
            Self::Loading => "Loading credentials...",
            Self::WaitingForScan => "Scan the QR code with the mobile app",
            Self::WaitingForConfirm => "Scanned, confirm the login on your phone",
            Self::QrExpired => "QR code expired, click to refresh",
            Self::Retry => "Login request failed, click to retry",
            Self::LoginError => "Login error, retry",
            Self::LoadingRoom => "Logged in, loading room info...",
        }
    }
}

impl fmt::Display for LoginHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Everything the view needs to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    Hint(LoginHint),
    QrReady { url: String },
    /// Post-login fetches landed so far, out of `total`.
    FetchProgress { done: usize, total: usize },
    /// Login complete and every post-login fetch landed.
    Ready,
    AccountsChanged { names: Vec<String>, current: usize },
    LiveStarted { addr: Option<String>, key: Option<String> },
    LiveStopped,
    FaceVerification { url: Option<String> },
    /// Title in effect after a rename, with the updated history.
    TitleUpdated { title: String, recent: Vec<String> },
    RecentTitles(Vec<String>),
    AnnounceUpdated,
    /// Area the room is in after a change attempt, successful or not.
    RoomArea { parent: String, area: String },
    RecentAreas(Vec<RecentArea>),
    NewVersion(String),
    Error { title: String, message: String },
}

pub trait Presenter {
    fn present(&self, event: ViewEvent);
}

/// Writes every view event to the log.
#[derive(Debug, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn present(&self, event: ViewEvent) {
        match event {
            ViewEvent::Hint(hint) => tracing::info!("{}", hint),
            ViewEvent::QrReady { url } => tracing::info!("Scan to log in: {}", url),
            ViewEvent::FetchProgress { done, total } => {
                tracing::debug!("Post-login fetches: {}/{}", done, total)
            }
            ViewEvent::Ready => tracing::info!("Ready to go live"),
            ViewEvent::AccountsChanged { names, current } => {
                tracing::info!("Accounts: {:?} (current {})", names, current)
            }
            ViewEvent::LiveStarted { addr, .. } => {
                tracing::info!("Live started, ingest {}", addr.as_deref().unwrap_or("-"))
            }
            ViewEvent::LiveStopped => tracing::info!("Live stopped"),
            ViewEvent::FaceVerification { url } => tracing::warn!(
                "Face verification required: {}",
                url.as_deref().unwrap_or("open the mobile app")
            ),
            ViewEvent::TitleUpdated { title, .. } => tracing::info!("Title: {}", title),
            ViewEvent::RecentTitles(titles) => tracing::debug!("Recent titles: {:?}", titles),
            ViewEvent::AnnounceUpdated => tracing::info!("Announcement updated"),
            ViewEvent::RoomArea { parent, area } => tracing::info!("Area: {} / {}", parent, area),
            ViewEvent::RecentAreas(areas) => tracing::debug!("Recent areas: {}", areas.len()),
            ViewEvent::NewVersion(tag) => tracing::info!("New version available: {}", tag),
            ViewEvent::Error { title, message } => tracing::error!("{}: {}", title, message),
        }
    }
}

/// Keeps every event; used by tests and by callers that poll the view state.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    events: RefCell<Vec<ViewEvent>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ViewEvent> {
        self.events.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&ViewEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl Presenter for RecordingPresenter {
    fn present(&self, event: ViewEvent) {
        self.events.borrow_mut().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_presenter_counts() {
        let presenter = RecordingPresenter::new();
        presenter.present(ViewEvent::Ready);
        presenter.present(ViewEvent::Hint(LoginHint::QrExpired));
        presenter.present(ViewEvent::Ready);

        assert_eq!(presenter.count(|e| *e == ViewEvent::Ready), 2);
        presenter.clear();
        assert!(presenter.events().is_empty());
    }

    #[test]
    fn test_hint_text() {
        assert_eq!(LoginHint::LoginError.to_string(), "Login error, retry");
    }
}
