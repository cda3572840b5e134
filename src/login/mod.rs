// Login flow - QR login and the post-login join barrier
//
// The flow runs on the controller thread next to the Scheduler. It never
// blocks: every step submits a task and continues in that task's callback.
//
//   start ─► CredentialManager ─┬─ scanned ───────────────► post_login
//                               ├─ expired / new ─► FetchQr + PollLogin ─► post_login
//                               └─ otherwise ─► LoginError hint
//
//   post_login ─► FetchRoom, FetchAnnounce, FetchArea (+ ConstUpdate) ─► Ready
//              └► RoomStatusCheck, LoadRecentTitles (not gating)
//
// Each start() opens a new session. Callbacks carry the session they were
// submitted in and ignore results from an older one. A fan-out fetch that an
// older session left running is resubmitted once it finishes, and fetch
// bodies drop their results after a session reset.

use crate::credentials::CredentialError;
use crate::models::ACCOUNT_KEY_PREFIX;
use crate::tasks::{Callbacks, Scheduler, Task, TaskKind, TaskOutcome, TaskSignal};
use crate::ui::presenter::{LoginHint, Presenter, ViewEvent};
use crate::workers::{
    ConstUpdate, CredentialManager, FetchAnnounce, FetchArea, FetchQr, FetchRoom,
    FetchUsernames, LoadRecentTitles, PollLogin, RoomStatusCheck, TaskDeps, VersionCheck,
};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Number of post-login fetches the barrier waits for.
pub const JOIN_FLAGS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    NotScanned,
    ScannedUnconfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginPhase {
    #[default]
    Idle,
    LoadingCredentials,
    QrGenerated,
    Polling(PollState),
    /// Logged in, post-login fetches in flight.
    Confirmed,
    /// QR expired or polling failed; waits for a retry.
    Expired,
    Ready,
}

struct FlowInner {
    scheduler: Scheduler,
    deps: TaskDeps,
    presenter: Rc<dyn Presenter>,
    const_update: bool,
    phase: Cell<LoginPhase>,
    session: Cell<u64>,
    current: Cell<usize>,
    ready_fired: Cell<bool>,
    version_checked: Cell<bool>,
    // A task of the same kind was still winding down when we wanted a new one.
    poll_pending: Cell<bool>,
    credentials_pending: Cell<Option<(usize, bool)>>,
    fetch_pending: RefCell<Vec<TaskKind>>,
}

/// Drives credential loading, QR login and the post-login fan-out.
///
/// # Example
/// ```ignore
/// let flow = LoginFlow::new(scheduler.clone(), deps, presenter, true);
/// flow.start(0, false);
/// loop {
///     scheduler.pump(Duration::from_millis(100));
///     if flow.phase() == LoginPhase::Ready { break; }
/// }
/// ```
#[derive(Clone)]
pub struct LoginFlow {
    inner: Rc<FlowInner>,
}

impl LoginFlow {
    /// # Arguments
    /// * `const_update` - refresh platform constants before the join can
    ///   complete; when false the constants flag is set up front
    pub fn new(
        scheduler: Scheduler,
        deps: TaskDeps,
        presenter: Rc<dyn Presenter>,
        const_update: bool,
    ) -> Self {
        Self {
            inner: Rc::new(FlowInner {
                scheduler,
                deps,
                presenter,
                const_update,
                phase: Cell::new(LoginPhase::Idle),
                session: Cell::new(0),
                current: Cell::new(0),
                ready_fired: Cell::new(false),
                version_checked: Cell::new(false),
                poll_pending: Cell::new(false),
                credentials_pending: Cell::new(None),
                fetch_pending: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn phase(&self) -> LoginPhase {
        self.inner.phase.get()
    }

    pub fn session(&self) -> u64 {
        self.inner.session.get()
    }

    /// Position of the selected account in the credential index.
    pub fn current_account(&self) -> usize {
        self.inner.current.get()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.phase.get() == LoginPhase::Ready
    }

    pub fn deps(&self) -> &TaskDeps {
        &self.inner.deps
    }

    /// Open a new session for the account at `position`.
    ///
    /// Stops long-lived tasks, resets per-session state, refreshes constants
    /// and loads the account. With `is_new` the stored credentials are
    /// skipped and a QR login starts.
    pub fn start(&self, position: usize, is_new: bool) {
        self.inner.start(position, is_new);
    }

    /// Drop the current QR code and poll a fresh one.
    ///
    /// Returns false when already logged in.
    pub fn retry(&self) -> bool {
        if self.inner.deps.state.scan.read(|scan| scan.scanned) {
            return false;
        }
        self.inner.fetch_qr(true);
        true
    }

    /// Switch to the account at `position`; a position past the last stored
    /// account selects a new-account slot.
    ///
    /// Ignored (returns false) while a login is still settling.
    pub fn switch_account(&self, position: usize) -> bool {
        if !self.inner.can_switch() {
            tracing::info!("Account switch ignored while login is in progress");
            return false;
        }
        let len = self.inner.account_count();
        self.inner.start(position.min(len), position >= len);
        true
    }

    pub fn add_new_account(&self) -> bool {
        self.switch_account(self.inner.account_count())
    }

    /// Forget the current account and its title history, then restart on
    /// its neighbour.
    ///
    /// # Returns
    /// The removed account key, if the position was occupied.
    pub fn logout(&self) -> Result<Option<String>, CredentialError> {
        let store = &self.inner.deps.store;
        let mut current = self.inner.current.get();
        let removed = store.remove_account(current, &mut current)?;
        match &removed {
            Some(key) => {
                tracing::info!("Logged out {}", key);
                self.inner.forget_title_history(key);
            }
            None => tracing::info!("Logout on an empty slot"),
        }

        let len = store.list_accounts()?.len();
        self.inner.start(current, current >= len);
        Ok(removed)
    }

    /// Wipe every stored account and setting, then start over on a new slot.
    pub fn clear_all_credentials(&self) -> Result<(), CredentialError> {
        self.inner.deps.store.clear_all()?;
        self.inner.deps.state.obs_settings.reset();
        self.inner.deps.state.app_settings.reset();
        tracing::info!("All credentials cleared");
        self.inner.start(0, true);
        Ok(())
    }
}

impl FlowInner {
    fn set_phase(&self, phase: LoginPhase) {
        let previous = self.phase.replace(phase);
        if previous != phase {
            tracing::debug!("Login phase {:?} -> {:?}", previous, phase);
        }
    }

    fn hint(&self, hint: LoginHint) {
        self.presenter.present(ViewEvent::Hint(hint));
    }

    fn account_count(&self) -> usize {
        self.deps.state.accounts.read(|cache| cache.keys.len())
    }

    /// Wrap a continuation so it only runs while the flow is alive and still
    /// in `session`.
    fn continuation<F>(self: &Rc<Self>, session: u64, f: F) -> impl FnOnce(&TaskOutcome) + 'static
    where
        F: FnOnce(&Rc<FlowInner>, &TaskOutcome) + 'static,
    {
        let weak = Rc::downgrade(self);
        move |outcome| {
            if let Some(flow) = weak.upgrade() {
                if flow.session.get() == session {
                    f(&flow, outcome);
                } else {
                    tracing::debug!("Ignoring {} from session {}", outcome.kind, session);
                }
            }
        }
    }

    fn start(self: &Rc<Self>, position: usize, is_new: bool) {
        let session = self.session.get() + 1;
        self.session.set(session);
        self.current.set(position);
        self.ready_fired.set(false);
        self.poll_pending.set(false);
        self.fetch_pending.borrow_mut().clear();
        tracing::info!(
            "Login session {} for account position {} (new={})",
            session,
            position,
            is_new
        );

        self.scheduler.stop_all();
        self.deps.state.reset_session();
        self.set_phase(LoginPhase::LoadingCredentials);
        self.hint(LoginHint::Loading);

        self.refresh_constants();
        if !self.version_checked.replace(true) {
            self.check_version();
        }
        self.submit_credentials(position, is_new);
    }

    fn check_version(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        self.scheduler.submit(
            VersionCheck::new(self.deps.clone()),
            Callbacks::new().quiet().on_signal(move |signal| {
                if let (Some(flow), TaskSignal::NewVersion(tag)) = (weak.upgrade(), signal) {
                    flow.presenter.present(ViewEvent::NewVersion(tag));
                }
            }),
        );
    }

    fn refresh_constants(self: &Rc<Self>) {
        if !self.const_update {
            self.deps.state.scan.update(|scan| scan.const_updated = true);
            return;
        }
        if self.deps.state.scan.read(|scan| scan.const_updated) {
            return;
        }

        // Constants are process-wide; their completion counts for whichever
        // session is current.
        let weak: Weak<FlowInner> = Rc::downgrade(self);
        self.scheduler.submit(
            ConstUpdate::new(self.deps.clone()),
            Callbacks::new().on_finished(move |_| {
                if let Some(flow) = weak.upgrade() {
                    flow.check_join();
                }
            }),
        );
    }

    fn submit_credentials(self: &Rc<Self>, position: usize, is_new: bool) {
        if self.scheduler.is_running(TaskKind::CredentialManager) {
            tracing::debug!("Credential manager still running, deferring load");
            self.credentials_pending.set(Some((position, is_new)));
            return;
        }

        let session = self.session.get();
        let weak = Rc::downgrade(self);
        self.scheduler.submit(
            CredentialManager::new(self.deps.clone(), position, is_new),
            Callbacks::new().on_finished(move |_| {
                let Some(flow) = weak.upgrade() else { return };
                if let Some((position, is_new)) = flow.credentials_pending.take() {
                    // The finished run belonged to an older session and may
                    // have written into this one.
                    flow.deps.state.reset_session();
                    flow.submit_credentials(position, is_new);
                } else if flow.session.get() == session {
                    flow.credentials_loaded();
                }
            }),
        );
    }

    fn credentials_loaded(self: &Rc<Self>) {
        let scan = self.deps.state.scan.update(|scan| {
            scan.cred_loaded = true;
            scan.clone()
        });

        if scan.scanned {
            let current_key = self.deps.state.cookies.read(|c| c.account_key());
            self.post_login();
            self.refresh_usernames(current_key);
        } else if scan.expired || scan.is_new {
            self.fetch_qr(false);
        } else {
            self.set_phase(LoginPhase::Idle);
            self.hint(LoginHint::LoginError);
        }
        self.present_accounts();
    }

    fn fetch_qr(self: &Rc<Self>, retry: bool) {
        let session = self.session.get();
        if retry {
            tracing::info!("Retrying QR login");
            self.scheduler.stop(TaskKind::PollLogin);
            self.deps.state.scan.update(|scan| scan.clear_qr());
        } else {
            self.deps.state.scan.update(|scan| scan.timeout = false);
        }
        self.set_phase(LoginPhase::QrGenerated);

        let weak = Rc::downgrade(self);
        self.scheduler.submit(
            FetchQr::new(self.deps.clone()),
            Callbacks::new()
                .quiet()
                .on_exception(move |_| {
                    if let Some(flow) = weak.upgrade() {
                        flow.hint(LoginHint::Retry);
                    }
                })
                .on_finished(self.continuation(session, |flow, outcome| {
                    flow.qr_fetched(outcome)
                })),
        );
        self.submit_poll();
    }

    fn qr_fetched(&self, outcome: &TaskOutcome) {
        if outcome.failed {
            self.set_phase(LoginPhase::Expired);
            return;
        }
        let Some(url) = self.deps.state.scan.read(|scan| scan.qr_url.clone()) else {
            return;
        };
        self.presenter.present(ViewEvent::QrReady { url });
        if self.phase.get() == LoginPhase::QrGenerated {
            self.set_phase(LoginPhase::Polling(PollState::NotScanned));
            self.hint(LoginHint::WaitingForScan);
        }
    }

    fn submit_poll(self: &Rc<Self>) {
        if self.scheduler.is_running(TaskKind::PollLogin) {
            tracing::debug!("Previous login poll still winding down, deferring");
            self.poll_pending.set(true);
            return;
        }

        let session = self.session.get();
        let on_signal = {
            let weak = Rc::downgrade(self);
            move |signal| {
                if let Some(flow) = weak.upgrade().filter(|f| f.session.get() == session) {
                    flow.poll_signal(signal);
                }
            }
        };
        let on_exception = {
            let weak = Rc::downgrade(self);
            move |_: &crate::tasks::TaskError| {
                if let Some(flow) = weak.upgrade().filter(|f| f.session.get() == session) {
                    flow.set_phase(LoginPhase::Expired);
                    flow.hint(LoginHint::Retry);
                }
            }
        };
        let weak = Rc::downgrade(self);
        self.scheduler.submit(
            PollLogin::new(self.deps.clone()),
            Callbacks::new()
                .quiet()
                .on_signal(on_signal)
                .on_exception(on_exception)
                .on_finished(move |outcome| {
                    if let Some(flow) = weak.upgrade() {
                        flow.poll_finished(session, outcome);
                    }
                }),
        );
    }

    fn poll_signal(&self, signal: TaskSignal) {
        match signal {
            TaskSignal::QrNotConfirmed => {
                let unconfirmed = LoginPhase::Polling(PollState::ScannedUnconfirmed);
                if self.phase.get() != unconfirmed {
                    self.set_phase(unconfirmed);
                    self.hint(LoginHint::WaitingForConfirm);
                }
            }
            TaskSignal::QrExpired => {
                self.set_phase(LoginPhase::Expired);
                self.hint(LoginHint::QrExpired);
            }
            TaskSignal::QrScanned => tracing::debug!("QR login scanned"),
            TaskSignal::NewVersion(tag) => self.presenter.present(ViewEvent::NewVersion(tag)),
        }
    }

    fn poll_finished(self: &Rc<Self>, session: u64, outcome: &TaskOutcome) {
        if self.poll_pending.take() {
            self.submit_poll();
            return;
        }
        if session != self.session.get() || outcome.stopped || outcome.failed {
            return;
        }

        let scan = self.deps.state.scan.snapshot();
        if scan.scanned {
            self.login_confirmed();
        } else if scan.timeout {
            self.set_phase(LoginPhase::Expired);
        }
    }

    fn login_confirmed(self: &Rc<Self>) {
        let key = self.deps.state.cookies.read(|c| c.account_key());
        let position = self.deps.state.accounts.read(|cache| {
            key.as_ref()
                .and_then(|k| cache.keys.iter().position(|existing| existing == k))
                .unwrap_or_else(|| cache.keys.len().saturating_sub(1))
        });
        self.current.set(position);

        self.post_login();
        self.refresh_usernames(None);
        self.present_accounts();
    }

    /// Fan out the post-login fetches; the join completes in `check_join`.
    fn post_login(self: &Rc<Self>) {
        let session = self.session.get();
        self.set_phase(LoginPhase::Confirmed);
        self.hint(LoginHint::LoadingRoom);
        self.refresh_constants();

        self.scheduler
            .submit(RoomStatusCheck::new(self.deps.clone()), Callbacks::new());

        for kind in [
            TaskKind::FetchRoom,
            TaskKind::FetchAnnounce,
            TaskKind::FetchArea,
            TaskKind::LoadRecentTitles,
        ] {
            self.submit_fetch(session, kind);
        }
    }

    /// Submit one session fetch, or queue it behind a same-kind task that an
    /// earlier session left running.
    fn submit_fetch(self: &Rc<Self>, session: u64, kind: TaskKind) {
        if self.scheduler.is_running(kind) {
            tracing::debug!("{} from an earlier session still running, deferring", kind);
            self.fetch_pending.borrow_mut().push(kind);
            return;
        }

        let task: Box<dyn Task> = match kind {
            TaskKind::FetchRoom => Box::new(FetchRoom::new(self.deps.clone())),
            TaskKind::FetchAnnounce => Box::new(FetchAnnounce::new(self.deps.clone())),
            TaskKind::FetchArea => Box::new(FetchArea::new(self.deps.clone())),
            TaskKind::LoadRecentTitles => Box::new(LoadRecentTitles::new(self.deps.clone())),
            other => {
                tracing::warn!("{} is not a post-login fetch", other);
                return;
            }
        };
        let weak = Rc::downgrade(self);
        self.scheduler.submit_boxed(
            task,
            Callbacks::new().on_finished(move |outcome| {
                if let Some(flow) = weak.upgrade() {
                    flow.fetch_finished(session, outcome.kind);
                }
            }),
        );
    }

    fn fetch_finished(self: &Rc<Self>, session: u64, kind: TaskKind) {
        let deferred = {
            let mut pending = self.fetch_pending.borrow_mut();
            let before = pending.len();
            pending.retain(|k| *k != kind);
            pending.len() != before
        };

        if deferred {
            self.submit_fetch(self.session.get(), kind);
        } else if session == self.session.get() {
            if kind == TaskKind::LoadRecentTitles {
                let titles = self.deps.state.room.read(|room| room.recent_titles.clone());
                self.presenter.present(ViewEvent::RecentTitles(titles));
            }
            self.check_join();
        } else {
            tracing::debug!("Ignoring {} from session {}", kind, session);
        }
    }

    /// Fire `Ready` once all four fetch flags are set; otherwise refresh the
    /// progress hint.
    fn check_join(&self) {
        let scan = self.deps.state.scan.snapshot();
        if !scan.scanned {
            return;
        }

        if scan.fetches_complete() {
            if !self.ready_fired.replace(true) {
                self.set_phase(LoginPhase::Ready);
                tracing::info!("Login session {} ready", self.session.get());
                self.presenter.present(ViewEvent::Ready);
            }
            return;
        }

        let done = [
            scan.area_updated,
            scan.room_updated,
            scan.const_updated,
            scan.announce_updated,
        ]
        .into_iter()
        .filter(|flag| *flag)
        .count();
        self.presenter.present(ViewEvent::FetchProgress {
            done,
            total: JOIN_FLAGS,
        });
    }

    fn refresh_usernames(self: &Rc<Self>, skip: Option<String>) {
        let session = self.session.get();
        self.scheduler.submit(
            FetchUsernames::new(self.deps.clone(), skip),
            Callbacks::new().on_finished(self.continuation(session, |flow, _| {
                flow.present_accounts()
            })),
        );
    }

    fn forget_title_history(&self, key: &str) {
        let Some(uid) = key.strip_prefix(ACCOUNT_KEY_PREFIX) else {
            return;
        };
        match self.deps.config.remove_recent_titles(uid) {
            Ok(true) => tracing::debug!("Removed title history of {}", key),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to remove title history of {}: {:#}", key, e),
        }
    }

    fn present_accounts(&self) {
        let names = self.deps.state.accounts.read(|cache| {
            cache
                .keys
                .iter()
                .map(|key| cache.display_name(key))
                .collect()
        });
        self.presenter.present(ViewEvent::AccountsChanged {
            names,
            current: self.current.get(),
        });
    }

    /// Switching is allowed on a new-account slot, after the join completed,
    /// after a failed credential load, or once the QR code expired.
    fn can_switch(&self) -> bool {
        if self.phase.get() == LoginPhase::Idle {
            return true;
        }
        let scan = self.deps.state.scan.snapshot();
        self.current.get() >= self.account_count()
            || scan.fetches_complete()
            || (scan.cred_loaded && !scan.expired && !scan.scanned)
            || scan.timeout
    }
}
