//! Shared fixtures for integration tests: a scripted platform API and a
//! harness wiring the scheduler to in-memory storage.

#![allow(dead_code)]

use async_trait::async_trait;
use camino::Utf8PathBuf;
use startlive::credentials::{CredentialStore, MemoryVault, SecretVault};
use startlive::login::LoginFlow;
use startlive::models::{CookieBundle, PlatformConstants, RecentArea};
use startlive::services::api::{QR_NOT_SCANNED, StartLiveReply};
use startlive::services::{
    ApiError, ApiReply, AreaEntry, AreaGroup, NavInfo, PlatformApi, QrCode, QrPoll, RoomSnapshot,
    TitleReply,
};
use startlive::ui::{Presenter, RecordingPresenter};
use startlive::workers::TaskDeps;
use startlive::{ConfigManager, Scheduler, SharedState};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub const QR_KEY: &str = "abc123";

/// Cookie bundle of a logged-in account with the given uid.
pub fn session(uid: &str) -> CookieBundle {
    [
        ("SESSDATA", format!("sess-{uid}")),
        ("DedeUserID", uid.to_string()),
        ("bili_jct", format!("csrf-{uid}")),
    ]
    .into_iter()
    .collect()
}

pub fn poll(code: i64) -> QrPoll {
    QrPoll {
        code,
        message: String::new(),
        cookies: CookieBundle::new(),
    }
}

pub fn poll_success(cookies: CookieBundle) -> QrPoll {
    QrPoll {
        code: 0,
        message: "OK".to_string(),
        cookies,
    }
}

/// Scripted [`PlatformApi`].
///
/// QR polls are served from a queue; once it runs dry every poll answers
/// "not scanned". Identity calls succeed for uids registered with
/// [`FakeApi::with_user`] and are rejected otherwise.
pub struct FakeApi {
    polls: Mutex<VecDeque<QrPoll>>,
    users: Mutex<HashMap<String, String>>,
    start_reply: Mutex<StartLiveReply>,
    stop_code: Mutex<i64>,
    latest: Mutex<String>,
    edit_code: Mutex<i64>,
    audit_title: Mutex<Option<String>>,
    /// Room edits in call order: `title:<t>`, `announce:<c>`, `area:<code>`.
    pub edits: Mutex<Vec<String>>,
    nav_gate: Option<Arc<Semaphore>>,
    room_gate: Option<Arc<Semaphore>>,
    pub qr_generated: AtomicUsize,
    pub polls_served: AtomicUsize,
    pub nav_calls: AtomicUsize,
    pub area_calls: AtomicUsize,
    pub room_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            polls: Mutex::new(VecDeque::new()),
            users: Mutex::new(HashMap::new()),
            start_reply: Mutex::new(StartLiveReply {
                code: 0,
                message: "ok".to_string(),
                addr: Some("rtmp://live-push.example/live/".to_string()),
                key: Some("?streamname=live_42".to_string()),
                face_url: None,
            }),
            stop_code: Mutex::new(0),
            latest: Mutex::new("v0.0.1".to_string()),
            edit_code: Mutex::new(0),
            audit_title: Mutex::new(None),
            edits: Mutex::new(Vec::new()),
            nav_gate: None,
            room_gate: None,
            qr_generated: AtomicUsize::new(0),
            polls_served: AtomicUsize::new(0),
            nav_calls: AtomicUsize::new(0),
            area_calls: AtomicUsize::new(0),
            room_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_polls(self, polls: impl IntoIterator<Item = QrPoll>) -> Self {
        self.polls.lock().unwrap().extend(polls);
        self
    }

    pub fn with_user(self, uid: &str, uname: &str) -> Self {
        self.users
            .lock()
            .unwrap()
            .insert(uid.to_string(), uname.to_string());
        self
    }

    /// Identity calls block until a permit is added to `gate`.
    pub fn with_nav_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.nav_gate = Some(gate);
        self
    }

    /// Room info calls block until a permit is added to `gate`.
    pub fn with_room_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.room_gate = Some(gate);
        self
    }

    pub fn with_start_reply(self, reply: StartLiveReply) -> Self {
        *self.start_reply.lock().unwrap() = reply;
        self
    }

    pub fn with_stop_code(self, code: i64) -> Self {
        *self.stop_code.lock().unwrap() = code;
        self
    }

    pub fn with_latest_release(self, tag: &str) -> Self {
        *self.latest.lock().unwrap() = tag.to_string();
        self
    }

    /// Code answered by title, announcement and area changes.
    pub fn with_edit_code(self, code: i64) -> Self {
        *self.edit_code.lock().unwrap() = code;
        self
    }

    /// Title the review keeps instead of the requested one.
    pub fn with_audit_title(self, title: &str) -> Self {
        *self.audit_title.lock().unwrap() = Some(title.to_string());
        self
    }

    pub fn edits(&self) -> Vec<String> {
        self.edits.lock().unwrap().clone()
    }

    fn edit_reply(&self, edit: String) -> ApiReply {
        self.edits.lock().unwrap().push(edit);
        let code = *self.edit_code.lock().unwrap();
        ApiReply {
            code,
            message: if code == 0 { "ok" } else { "refused" }.to_string(),
        }
    }

    pub fn push_polls(&self, polls: impl IntoIterator<Item = QrPoll>) {
        self.polls.lock().unwrap().extend(polls);
    }
}

#[async_trait]
impl PlatformApi for FakeApi {
    async fn generate_qr(&self) -> Result<QrCode, ApiError> {
        self.qr_generated.fetch_add(1, Ordering::SeqCst);
        Ok(QrCode {
            key: QR_KEY.to_string(),
            url: format!("https://passport.example/qr?key={QR_KEY}"),
        })
    }

    async fn poll_qr(&self, qr_key: &str) -> Result<QrPoll, ApiError> {
        assert_eq!(qr_key, QR_KEY);
        self.polls_served.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| poll(QR_NOT_SCANNED)))
    }

    async fn nav(&self, session: &CookieBundle) -> Result<NavInfo, ApiError> {
        if let Some(gate) = &self.nav_gate {
            gate.acquire().await.unwrap().forget();
        }
        self.nav_calls.fetch_add(1, Ordering::SeqCst);
        let uid = session.uid().unwrap_or_default().to_string();
        let uname = self.users.lock().unwrap().get(&uid).cloned();
        Ok(match uname {
            Some(uname) => NavInfo {
                code: 0,
                message: "0".to_string(),
                uname,
                mid: uid.parse().unwrap_or_default(),
            },
            None => NavInfo {
                code: -101,
                message: "Not logged in".to_string(),
                ..Default::default()
            },
        })
    }

    async fn area_list(&self, _session: &CookieBundle) -> Result<Vec<AreaGroup>, ApiError> {
        self.area_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            AreaGroup {
                name: "Games".to_string(),
                children: vec![
                    AreaEntry {
                        id: 27,
                        name: "Minecraft".to_string(),
                    },
                    AreaEntry {
                        id: 86,
                        name: "Terraria".to_string(),
                    },
                ],
            },
            AreaGroup {
                name: "Chat".to_string(),
                children: vec![AreaEntry {
                    id: 190,
                    name: "Just chatting".to_string(),
                }],
            },
        ])
    }

    async fn pre_live(&self, _session: &CookieBundle) -> Result<String, ApiError> {
        Ok("Evening stream".to_string())
    }

    async fn room_info(&self, _session: &CookieBundle) -> Result<RoomSnapshot, ApiError> {
        self.room_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.room_gate {
            gate.acquire().await.unwrap().forget();
        }
        Ok(RoomSnapshot {
            room_id: "1001".to_string(),
            live: false,
            parent_area: "Games".to_string(),
            area: "Minecraft".to_string(),
            area_code: 27,
        })
    }

    async fn announce(&self, _session: &CookieBundle) -> Result<String, ApiError> {
        Ok("Streaming every evening".to_string())
    }

    async fn room_pre_live_status(&self, _session: &CookieBundle) -> Result<ApiReply, ApiError> {
        Ok(ApiReply::default())
    }

    async fn start_live(
        &self,
        _session: &CookieBundle,
        _room_id: &str,
        _area_code: u32,
    ) -> Result<StartLiveReply, ApiError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.start_reply.lock().unwrap().clone())
    }

    async fn stop_live(&self, _session: &CookieBundle, _room_id: &str) -> Result<ApiReply, ApiError> {
        let code = *self.stop_code.lock().unwrap();
        Ok(ApiReply {
            code,
            message: if code == 0 { "ok" } else { "refused" }.to_string(),
        })
    }

    async fn update_title(
        &self,
        _session: &CookieBundle,
        _room_id: &str,
        title: &str,
    ) -> Result<TitleReply, ApiError> {
        let reply = self.edit_reply(format!("title:{title}"));
        Ok(TitleReply {
            audit_title: if reply.is_ok() {
                Some(
                    self.audit_title
                        .lock()
                        .unwrap()
                        .clone()
                        .unwrap_or_else(|| title.to_string()),
                )
            } else {
                None
            },
            code: reply.code,
            message: reply.message,
        })
    }

    async fn update_announce(
        &self,
        _session: &CookieBundle,
        content: &str,
    ) -> Result<ApiReply, ApiError> {
        Ok(self.edit_reply(format!("announce:{content}")))
    }

    async fn change_area(
        &self,
        _session: &CookieBundle,
        _room_id: &str,
        area_code: u32,
    ) -> Result<ApiReply, ApiError> {
        Ok(self.edit_reply(format!("area:{area_code}")))
    }

    async fn recent_areas(
        &self,
        _session: &CookieBundle,
        _room_id: &str,
    ) -> Result<Vec<RecentArea>, ApiError> {
        Ok(vec![
            RecentArea {
                parent: "Games".to_string(),
                name: "Terraria".to_string(),
            },
            RecentArea {
                parent: "Games".to_string(),
                name: "Minecraft".to_string(),
            },
        ])
    }

    async fn remote_constants(&self) -> Result<serde_json::Value, ApiError> {
        let constants = PlatformConstants {
            build: "9999".to_string(),
            ..Default::default()
        };
        serde_json::to_value(constants).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn latest_release(&self) -> Result<String, ApiError> {
        Ok(self.latest.lock().unwrap().clone())
    }
}

/// Scheduler, storage and state wired together around a [`FakeApi`].
///
/// The runtime is declared last so it outlives the scheduler.
pub struct Harness {
    pub presenter: Rc<RecordingPresenter>,
    pub scheduler: Scheduler,
    pub deps: TaskDeps,
    pub api: Arc<FakeApi>,
    pub vault: Arc<MemoryVault>,
    pub store: Arc<CredentialStore>,
    pub state: Arc<SharedState>,
    pub config_dir: Utf8PathBuf,
    _temp: TempDir,
    pub runtime: tokio::runtime::Runtime,
}

impl Harness {
    pub fn new(api: FakeApi) -> Self {
        Self::with_vault(api, Arc::new(MemoryVault::new()))
    }

    pub fn with_vault(api: FakeApi, vault: Arc<MemoryVault>) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let temp = TempDir::new().unwrap();
        let config_dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let config = Arc::new(ConfigManager::new(&config_dir).unwrap());

        let api = Arc::new(api);
        let store =
            Arc::new(CredentialStore::open(Arc::clone(&vault) as Arc<dyn SecretVault>).unwrap());
        let state = Arc::new(SharedState::new());
        let deps = TaskDeps::new(
            Arc::clone(&state),
            Arc::clone(&api) as Arc<dyn PlatformApi>,
            Arc::clone(&store),
            config,
        )
        .with_poll_interval(Duration::from_millis(10))
        .with_request_spacing(Duration::ZERO);

        Self {
            presenter: Rc::new(RecordingPresenter::new()),
            scheduler: Scheduler::new(runtime.handle().clone()),
            deps,
            api,
            vault,
            store,
            state,
            config_dir,
            _temp: temp,
            runtime,
        }
    }

    /// Store a logged-in account directly in the vault.
    pub fn seed_account(&self, uid: &str) -> String {
        self.store.add_account(&session(uid)).unwrap()
    }

    pub fn flow(&self, const_update: bool) -> LoginFlow {
        LoginFlow::new(
            self.scheduler.clone(),
            self.deps.clone(),
            Rc::clone(&self.presenter) as Rc<dyn Presenter>,
            const_update,
        )
    }

    /// Pump task events until `done` holds or `timeout` elapses.
    pub fn pump_until(&self, timeout: Duration, done: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.scheduler.drain();
            if done() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.scheduler.pump(Duration::from_millis(10));
        }
    }

    /// Pump for a fixed time, e.g. to let a few poll iterations pass.
    pub fn pump_for(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            self.scheduler.pump(Duration::from_millis(5));
        }
    }
}
