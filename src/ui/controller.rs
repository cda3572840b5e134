// Controller - owns the scheduler and login flow on one thread
//
// The controller is the only place where task events, control commands and
// the presenter meet:
// - task events are pumped from the scheduler's channel
// - commands arrive from the control endpoint (or the runner) on a queue
// - everything user-visible goes out through the Presenter
//
// Nothing here blocks except the explicit pump in tick().

use crate::login::LoginFlow;
use crate::tasks::{Callbacks, Scheduler, Task, TaskOutcome};
use crate::ui::presenter::{Presenter, ViewEvent};
use crate::ui::server::{CommandSender, ControlCommand};
use crate::workers::{
    FetchRecentAreas, StartLive, StopLive, TaskDeps, UpdateAnnounce, UpdateArea, UpdateTitle,
};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

/// Headless application controller.
///
/// # Example
/// ```ignore
/// let scheduler = Scheduler::new(runtime.handle().clone());
/// let mut controller = Controller::new(scheduler, deps, Rc::new(LogPresenter), true);
/// let commands = controller.command_sender();
/// controller.start(0);
/// while controller.tick(Duration::from_millis(100)) {}
/// controller.shutdown(Duration::from_secs(5));
/// ```
pub struct Controller {
    scheduler: Scheduler,
    flow: LoginFlow,
    deps: TaskDeps,
    presenter: Rc<dyn Presenter>,
    command_tx: mpsc::UnboundedSender<ControlCommand>,
    command_rx: mpsc::UnboundedReceiver<ControlCommand>,
    running: bool,
}

impl Controller {
    /// # Arguments
    /// * `scheduler` - scheduler bound to the worker runtime
    /// * `deps` - shared state, API client, credential store and config
    /// * `presenter` - where view events go
    /// * `const_update` - refresh platform constants on login
    pub fn new(
        scheduler: Scheduler,
        deps: TaskDeps,
        presenter: Rc<dyn Presenter>,
        const_update: bool,
    ) -> Self {
        let surface = Rc::downgrade(&presenter);
        scheduler.set_error_surface(move |error| {
            if let Some(presenter) = surface.upgrade() {
                presenter.present(ViewEvent::Error {
                    title: error.kind().name().to_string(),
                    message: error.to_string(),
                });
            }
        });

        let flow = LoginFlow::new(
            scheduler.clone(),
            deps.clone(),
            Rc::clone(&presenter),
            const_update,
        );
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tracing::info!("Controller initialized");

        Self {
            scheduler,
            flow,
            deps,
            presenter,
            command_tx,
            command_rx,
            running: true,
        }
    }

    pub fn command_sender(&self) -> CommandSender {
        CommandSender::new(self.command_tx.clone())
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn flow(&self) -> &LoginFlow {
        &self.flow
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Begin the first login session on the account at `position`.
    ///
    /// An empty position is treated as a new-account slot by the credential
    /// load.
    pub fn start(&self, position: usize) {
        self.flow.start(position, false);
    }

    /// Handle queued commands, then pump task events for up to `timeout`.
    ///
    /// Returns false once a shutdown was requested.
    pub fn tick(&mut self, timeout: Duration) -> bool {
        while let Ok(command) = self.command_rx.try_recv() {
            self.handle_command(command);
        }
        if self.running {
            self.scheduler.pump(timeout);
        }
        self.running
    }

    pub fn handle_command(&mut self, command: ControlCommand) {
        tracing::debug!("Handling {:?}", command);
        match command {
            ControlCommand::StartLive { area } => self.start_live(area),
            ControlCommand::StopLive => self.stop_live(),
            ControlCommand::UpdateTitle(title) => self.update_title(title),
            ControlCommand::UpdateAnnounce(content) => self.update_announce(content),
            ControlCommand::ChangeArea(area) => self.change_area(area),
            ControlCommand::FetchRecentAreas => self.fetch_recent_areas(),
            ControlCommand::RetryLogin => {
                self.flow.retry();
            }
            ControlCommand::SwitchAccount(position) => {
                self.flow.switch_account(position);
            }
            ControlCommand::AddAccount => {
                self.flow.add_new_account();
            }
            ControlCommand::Logout => {
                if let Err(e) = self.flow.logout() {
                    self.show_error("Logout", &e.to_string());
                }
            }
            ControlCommand::ClearCredentials => {
                if let Err(e) = self.flow.clear_all_credentials() {
                    self.show_error("Clear credentials", &e.to_string());
                }
            }
            ControlCommand::Shutdown => {
                tracing::info!("Shutdown requested");
                self.running = false;
            }
        }
    }

    fn show_error(&self, title: &str, message: &str) {
        self.presenter.present(ViewEvent::Error {
            title: title.to_string(),
            message: message.to_string(),
        });
    }

    fn start_live(&self, area: Option<String>) {
        if !self.deps.state.scan.read(|scan| scan.scanned) {
            self.show_error("Start live", "Not logged in");
            return;
        }
        if self.deps.state.stream.read(|stream| stream.live_status) {
            tracing::info!("Already live, ignoring start request");
            return;
        }

        let presenter = Rc::downgrade(&self.presenter);
        let deps = self.deps.clone();
        self.scheduler.submit(
            StartLive::new(self.deps.clone(), area),
            Callbacks::new().on_finished(move |outcome| {
                live_started(&presenter, &deps, outcome);
            }),
        );
    }

    fn stop_live(&self) {
        if !self.deps.state.stream.read(|stream| stream.live_status) {
            tracing::info!("Not live, ignoring stop request");
            return;
        }

        let presenter = Rc::downgrade(&self.presenter);
        self.scheduler.submit(
            StopLive::new(self.deps.clone()),
            Callbacks::new().on_finished(move |outcome| {
                if let (false, Some(presenter)) = (outcome.failed, presenter.upgrade()) {
                    presenter.present(ViewEvent::LiveStopped);
                }
            }),
        );
    }

    /// Submit a room edit for the logged-in account; `done` runs on the
    /// controller thread with the outcome.
    fn submit_edit<T, F>(&self, title: &str, task: T, done: F)
    where
        T: Task + 'static,
        F: FnOnce(&dyn Presenter, &TaskDeps, &TaskOutcome) + 'static,
    {
        if !self.deps.state.scan.read(|scan| scan.scanned) {
            self.show_error(title, "Not logged in");
            return;
        }

        let presenter = Rc::downgrade(&self.presenter);
        let deps = self.deps.clone();
        self.scheduler.submit(
            task,
            Callbacks::new().on_finished(move |outcome| {
                if let Some(presenter) = presenter.upgrade() {
                    done(presenter.as_ref(), &deps, outcome);
                }
            }),
        );
    }

    fn update_title(&self, title: String) {
        self.submit_edit(
            "Title update",
            UpdateTitle::new(self.deps.clone(), title),
            |presenter, deps, outcome| {
                if outcome.failed {
                    return;
                }
                let room = deps.state.room.snapshot();
                presenter.present(ViewEvent::TitleUpdated {
                    title: room.title,
                    recent: room.recent_titles,
                });
            },
        );
    }

    fn update_announce(&self, content: String) {
        self.submit_edit(
            "Announcement update",
            UpdateAnnounce::new(self.deps.clone(), content),
            |presenter, _, outcome| {
                if !outcome.failed {
                    presenter.present(ViewEvent::AnnounceUpdated);
                }
            },
        );
    }

    fn change_area(&self, area: String) {
        self.submit_edit(
            "Area update",
            UpdateArea::new(self.deps.clone(), area),
            |presenter, deps, _| {
                let (parent, area) = deps
                    .state
                    .room
                    .read(|room| (room.parent_area.clone(), room.area.clone()));
                presenter.present(ViewEvent::RoomArea { parent, area });
            },
        );
    }

    fn fetch_recent_areas(&self) {
        self.submit_edit(
            "Recent areas",
            FetchRecentAreas::new(self.deps.clone()),
            |presenter, deps, outcome| {
                if !outcome.failed {
                    let areas = deps.state.room.read(|room| room.recent_areas.clone());
                    presenter.present(ViewEvent::RecentAreas(areas));
                }
            },
        );
    }

    /// Stop long-lived tasks and wait up to `timeout` for the pool to drain.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.scheduler.stop_all();
        let idle = self.scheduler.run_until_idle(timeout);
        if !idle {
            tracing::warn!(
                "Tasks still running at shutdown: {:?}",
                self.scheduler.live_kinds()
            );
        }
        self.scheduler.metrics().log_summary();
        idle
    }
}

fn live_started(presenter: &Weak<dyn Presenter>, deps: &TaskDeps, outcome: &TaskOutcome) {
    let Some(presenter) = presenter.upgrade() else {
        return;
    };
    if outcome.failed {
        return;
    }

    let stream = deps.state.stream.snapshot();
    if stream.required_face {
        presenter.present(ViewEvent::FaceVerification {
            url: stream.face_url,
        });
    } else if stream.live_status {
        presenter.present(ViewEvent::LiveStarted {
            addr: stream.stream_addr,
            key: stream.stream_key,
        });
    }
}
