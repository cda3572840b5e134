//! Data models for the StartLive core.
//!
//! This module contains the records shared between tasks and the controller:
//! - [`ScanStatus`]: QR-login progress and the post-login fan-out flags
//! - [`StreamStatus`], [`RoomInfo`]: live room state fetched after login, with
//!   the title and area history
//! - [`AppSettings`], [`ObsSettings`]: preferences persisted in the secret vault
//! - [`CookieBundle`], [`AccountCache`]: per-account credentials and display names
//! - [`AreaCatalog`]: live categories used to start a stream
//! - [`LaunchConfig`], [`PlatformConstants`]: launch options and request constants
//!
//! # Architecture Note
//!
//! The records are plain data. Shared access goes through
//! [`SharedState`](crate::state::SharedState), which wraps each record in its
//! own lock.

pub mod app_state;
pub mod config;

pub use app_state::{
    ACCOUNT_KEY_PREFIX, AccountCache, AppSettings, AreaCatalog, COOKIE_CSRF, COOKIE_UID,
    CookieBundle, MAX_CONCURRENT_TASKS, MAX_RECENT_TITLES, ObsSettings, ProxyMode, RecentArea,
    RoomInfo, ScanStatus, StreamStatus, username_display,
};
pub use config::{LaunchConfig, PlatformConstants, VaultBackend};
