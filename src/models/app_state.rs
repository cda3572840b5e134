use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum number of task bodies executing at the same time.
///
/// The scheduler enforces this with a `tokio::sync::Semaphore` on top of the
/// runtime's worker threads. Long-lived tasks hold their permit for their
/// whole lifetime, so this must stay above the number of long-lived task
/// kinds plus the post-login fan-out.
///
/// # See Also
///
/// - [`crate::tasks::Scheduler`] - Acquires a permit before running each body
pub const MAX_CONCURRENT_TASKS: usize = 8;

/// Prefix of every per-account vault key (`cookies|<uid>`).
pub const ACCOUNT_KEY_PREFIX: &str = "cookies|";

/// Cookie carrying the account's numeric id.
pub const COOKIE_UID: &str = "DedeUserID";

/// Cookie carrying the csrf token for mutating calls.
pub const COOKIE_CSRF: &str = "bili_jct";

/// QR-login progress shared between the login tasks and the controller.
///
/// Once `scanned` is true the `qr_key`/`qr_url` pair is stale and must not be
/// used for polling again.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanStatus {
    pub scanned: bool,
    pub qr_key: Option<String>,
    pub qr_url: Option<String>,
    pub expired: bool,
    pub is_new: bool,
    pub cred_loaded: bool,
    pub timeout: bool,
    pub wait_for_confirm: bool,

    // Post-login fan-out flags
    pub area_updated: bool,
    pub room_updated: bool,
    pub const_updated: bool,
    pub announce_updated: bool,
}

impl ScanStatus {
    /// True once every post-login fetch has landed.
    pub fn fetches_complete(&self) -> bool {
        self.area_updated && self.room_updated && self.const_updated && self.announce_updated
    }

    /// Login succeeded and every post-login fetch has landed.
    pub fn is_ready(&self) -> bool {
        self.scanned && self.fetches_complete()
    }

    /// Drop the transient QR fields before a new QR is requested.
    pub fn clear_qr(&mut self) {
        self.qr_key = None;
        self.qr_url = None;
        self.wait_for_confirm = false;
        self.timeout = false;
    }
}

/// RTMP and verification state of the current room.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamStatus {
    pub live_status: bool,
    pub required_face: bool,
    pub identified_face: bool,
    pub face_url: Option<String>,
    pub stream_addr: Option<String>,
    pub stream_key: Option<String>,
}

/// Room details fetched after login.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomInfo {
    pub room_id: String,
    pub title: String,
    pub parent_area: String,
    pub area: String,
    pub area_code: u32,
    pub announcement: String,
    /// Most recent first, at most [`MAX_RECENT_TITLES`].
    pub recent_titles: Vec<String>,
    pub recent_areas: Vec<RecentArea>,
}

/// Titles kept in the per-account title history.
pub const MAX_RECENT_TITLES: usize = 10;

impl RoomInfo {
    /// Move `title` to the front of the history, dropping the oldest entries.
    pub fn remember_title(&mut self, title: &str) {
        self.recent_titles.retain(|t| t != title);
        self.recent_titles.insert(0, title.to_string());
        self.recent_titles.truncate(MAX_RECENT_TITLES);
    }

    /// Append titles loaded from disk behind the ones already known.
    pub fn merge_recent_titles(&mut self, titles: impl IntoIterator<Item = String>) {
        for title in titles {
            if !title.is_empty() && !self.recent_titles.contains(&title) {
                self.recent_titles.push(title);
            }
        }
        self.recent_titles.truncate(MAX_RECENT_TITLES);
    }
}

/// One entry of the account's recently used areas.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentArea {
    pub parent: String,
    pub name: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    #[default]
    None,
    System,
    Custom,
}

/// Application-wide preferences persisted under the `appSettings` vault key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub proxy_mode: ProxyMode,
    pub custom_proxy_url: String,
    pub custom_tray_hint: String,
    pub app_buvid: String,
}

/// OBS connection settings persisted under the `settings` vault key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObsSettings {
    pub ip_addr: String,
    pub port: String,
    pub password: String,
    pub auto_live: bool,
    pub auto_connect: bool,
}

impl Default for ObsSettings {
    fn default() -> Self {
        Self {
            ip_addr: "localhost".to_string(),
            port: "4455".to_string(),
            password: String::new(),
            auto_live: false,
            auto_connect: false,
        }
    }
}

/// Cookies of one logged-in account, in the order the platform sent them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieBundle(IndexMap<String, String>);

impl CookieBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Numeric account id, if the bundle came from a completed login.
    pub fn uid(&self) -> Option<&str> {
        self.get(COOKIE_UID).filter(|uid| !uid.is_empty())
    }

    /// Token that authorizes mutating calls.
    pub fn csrf(&self) -> Option<&str> {
        self.get(COOKIE_CSRF).filter(|token| !token.is_empty())
    }

    /// Stable vault key derived from the identity cookie.
    pub fn account_key(&self) -> Option<String> {
        self.uid().map(|uid| format!("{ACCOUNT_KEY_PREFIX}{uid}"))
    }

    /// Render as a `Cookie` request header value.
    pub fn header_value(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Collect cookies from raw `Set-Cookie` header values.
    ///
    /// Only the leading `name=value` pair of each header is kept; attributes
    /// such as `Path` or `Expires` are dropped.
    pub fn from_set_cookie<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut bundle = Self::new();
        for header in headers {
            let pair = header.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    bundle.insert(name, value.trim());
                }
            }
        }
        bundle
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CookieBundle {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Stored accounts as last read from the vault, plus their display names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountCache {
    pub keys: Vec<String>,
    pub usernames: HashMap<String, String>,
}

impl AccountCache {
    /// Replace the key list; every key starts out displayed as itself.
    pub fn reload(&mut self, keys: Vec<String>) {
        self.usernames = keys.iter().map(|k| (k.clone(), k.clone())).collect();
        self.keys = keys;
    }

    pub fn display_name(&self, key: &str) -> String {
        self.usernames
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

/// Format used for resolved account names.
pub fn username_display(uname: &str, mid: u64) -> String {
    format!("{uname} ({mid})")
}

/// Live categories: parent area → child names, plus lookup tables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AreaCatalog {
    pub options: IndexMap<String, Vec<String>>,
    pub codes: HashMap<String, u32>,
    pub parents: HashMap<String, String>,
}

impl AreaCatalog {
    pub fn insert(&mut self, parent: &str, child: &str, code: u32) {
        self.options
            .entry(parent.to_string())
            .or_default()
            .push(child.to_string());
        self.codes.insert(child.to_string(), code);
        self.parents.insert(child.to_string(), parent.to_string());
    }

    pub fn code_of(&self, child: &str) -> Option<u32> {
        self.codes.get(child).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}
