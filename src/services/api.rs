//! The remote platform, seen as one async method per endpoint.
//!
//! Task bodies talk to the platform only through [`PlatformApi`], so the
//! scheduler and login flow can be exercised against a scripted fake. The
//! production implementation is [`HttpApi`](super::http::HttpApi).

use crate::models::{CookieBundle, RecentArea};
use async_trait::async_trait;
use thiserror::Error;

/// QR poll: the code has not been scanned yet.
pub const QR_NOT_SCANNED: i64 = 86101;

/// QR poll: scanned, waiting for confirmation on the phone.
pub const QR_NOT_CONFIRMED: i64 = 86090;

/// QR poll: the code expired.
pub const QR_EXPIRED: i64 = 86038;

/// Start live: face verification required.
pub const LIVE_FACE_REQUIRED: i64 = 60024;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Platform returned code {code}: {message}")]
    Platform { code: i64, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn platform(code: i64, message: impl Into<String>) -> Self {
        Self::Platform {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrCode {
    pub key: String,
    pub url: String,
}

/// One answer of the QR poll endpoint.
///
/// `cookies` is only populated when `code == 0`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QrPoll {
    pub code: i64,
    pub message: String,
    pub cookies: CookieBundle,
}

/// Identity call result; `code != 0` means the session is no longer valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavInfo {
    pub code: i64,
    pub message: String,
    pub uname: String,
    pub mid: u64,
}

impl NavInfo {
    pub fn is_valid(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaEntry {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaGroup {
    pub name: String,
    pub children: Vec<AreaEntry>,
}

/// Room id, live flag and area of the logged-in account's room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub live: bool,
    pub parent_area: String,
    pub area: String,
    pub area_code: u32,
}

/// Bare `{code, message}` reply of calls without a useful payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiReply {
    pub code: i64,
    pub message: String,
}

impl ApiReply {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartLiveReply {
    pub code: i64,
    pub message: String,
    pub addr: Option<String>,
    pub key: Option<String>,
    pub face_url: Option<String>,
}

/// Answer of a title change; the platform may rewrite the title during
/// review and returns the version it kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleReply {
    pub code: i64,
    pub message: String,
    pub audit_title: Option<String>,
}

/// Every remote call a task body makes.
///
/// Methods taking a `session` send that account's cookies; the others are
/// anonymous. Non-zero platform codes that callers must branch on are
/// returned as data; the rest surface as [`ApiError::Platform`].
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn generate_qr(&self) -> Result<QrCode, ApiError>;

    async fn poll_qr(&self, qr_key: &str) -> Result<QrPoll, ApiError>;

    async fn nav(&self, session: &CookieBundle) -> Result<NavInfo, ApiError>;

    async fn area_list(&self, session: &CookieBundle) -> Result<Vec<AreaGroup>, ApiError>;

    /// Current room title.
    async fn pre_live(&self, session: &CookieBundle) -> Result<String, ApiError>;

    async fn room_info(&self, session: &CookieBundle) -> Result<RoomSnapshot, ApiError>;

    async fn announce(&self, session: &CookieBundle) -> Result<String, ApiError>;

    async fn room_pre_live_status(&self, session: &CookieBundle) -> Result<ApiReply, ApiError>;

    async fn start_live(
        &self,
        session: &CookieBundle,
        room_id: &str,
        area_code: u32,
    ) -> Result<StartLiveReply, ApiError>;

    async fn stop_live(&self, session: &CookieBundle, room_id: &str) -> Result<ApiReply, ApiError>;

    async fn update_title(
        &self,
        session: &CookieBundle,
        room_id: &str,
        title: &str,
    ) -> Result<TitleReply, ApiError>;

    async fn update_announce(&self, session: &CookieBundle, content: &str)
    -> Result<ApiReply, ApiError>;

    async fn change_area(
        &self,
        session: &CookieBundle,
        room_id: &str,
        area_code: u32,
    ) -> Result<ApiReply, ApiError>;

    /// Areas the room streamed in recently, most recent first.
    async fn recent_areas(
        &self,
        session: &CookieBundle,
        room_id: &str,
    ) -> Result<Vec<RecentArea>, ApiError>;

    /// Raw `version.json` document with the latest request constants.
    async fn remote_constants(&self) -> Result<serde_json::Value, ApiError>;

    /// Tag of the latest published release.
    async fn latest_release(&self) -> Result<String, ApiError>;
}
