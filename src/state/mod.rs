// State management module
//
// This module provides the lock-guarded containers shared by background tasks
// and the controller. Each logical group of state sits behind its own RwLock so
// a slow writer in one group never blocks readers of another.

use crate::models::{
    AccountCache, AppSettings, AreaCatalog, CookieBundle, ObsSettings, PlatformConstants,
    RoomInfo, ScanStatus, StreamStatus,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Thread-safe container for one record.
///
/// # Usage
///
/// Never hold on to the inner lock across an `.await`; use the closures:
/// - [`read()`](Self::read) for reading a few fields without cloning
/// - [`update()`](Self::update) for mutations
/// - [`snapshot()`](Self::snapshot) for a detached copy
///
/// Cloning a `Shared` clones the handle, not the value.
pub struct Shared<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    /// Execute a function with read access to the value
    ///
    /// # Example
    /// ```ignore
    /// let scanned = state.scan.read(|scan| scan.scanned);
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Mutate the value under the write lock and return the closure's result
    ///
    /// # Example
    /// ```ignore
    /// state.scan.update(|scan| scan.area_updated = true);
    /// ```
    pub fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Swap in a new value
    pub fn replace(&self, value: T) -> T {
        self.update(|current| std::mem::replace(current, value))
    }
}

impl<T: Clone> Shared<T> {
    /// Get a detached copy of the current value
    pub fn snapshot(&self) -> T {
        self.read(T::clone)
    }
}

impl<T: Default> Shared<T> {
    /// Restore the default value
    pub fn reset(&self) {
        self.replace(T::default());
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Process-wide state, passed by `Arc` to every task.
///
/// # Writers
///
/// Each field has one conventional writer at a time; nothing enforces it
/// beyond the scheduler's one-task-per-kind rule:
/// - `scan`: the credential, QR, poll and fan-out tasks (disjoint flags)
/// - `stream`, `room`: the room fetch and live tasks
/// - `cookies`, `accounts`: the credential and poll tasks
/// - `areas`: the area fetch task
/// - `constants`: the constants refresh task
/// - `app_settings`, `obs_settings`: the controller and the credential task
#[derive(Default)]
pub struct SharedState {
    pub scan: Shared<ScanStatus>,
    pub stream: Shared<StreamStatus>,
    pub room: Shared<RoomInfo>,
    pub app_settings: Shared<AppSettings>,
    pub obs_settings: Shared<ObsSettings>,
    pub cookies: Shared<CookieBundle>,
    pub accounts: Shared<AccountCache>,
    pub areas: Shared<AreaCatalog>,
    pub constants: Shared<PlatformConstants>,
    epoch: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation of the session state; every [`reset_session`](Self::reset_session)
    /// starts a new one.
    ///
    /// Session-scoped tasks record it when they are created and drop their
    /// results once it moved on.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Reset per-session state before switching or re-logging an account.
    ///
    /// Platform constants are process-wide, so `const_updated` survives the
    /// reset as long as a refresh already landed.
    pub fn reset_session(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let const_updated = self.scan.read(|scan| scan.const_updated);
        self.scan.replace(ScanStatus {
            const_updated,
            ..Default::default()
        });
        self.room.reset();
        self.stream.reset();
        self.areas.reset();
        self.cookies.reset();

        tracing::debug!("Session state reset (const_updated={})", const_updated);
    }
}
