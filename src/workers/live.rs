use super::{StartLiveError, StopLiveError, TaskDeps};
use crate::services::api::LIVE_FACE_REQUIRED;
use crate::tasks::{Task, TaskContext, TaskKind};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Opens a broadcast in the selected area.
///
/// On success the ingest address and key land in `stream`. A face
/// verification demand is not an error: it sets `required_face` and
/// `face_url` and leaves the stream closed.
pub struct StartLive {
    deps: TaskDeps,
    area: Option<String>,
}

impl StartLive {
    /// `area` is a child area name from the catalog; `None` keeps the room's
    /// current area.
    pub fn new(deps: TaskDeps, area: Option<String>) -> Self {
        Self { deps, area }
    }

    fn resolve_area(&self, current: u32) -> Result<u32, StartLiveError> {
        match &self.area {
            Some(name) => self
                .deps
                .state
                .areas
                .read(|areas| areas.code_of(name))
                .ok_or(StartLiveError::NoArea),
            None if current != 0 => Ok(current),
            None => Err(StartLiveError::NoArea),
        }
    }
}

#[async_trait]
impl Task for StartLive {
    fn kind(&self) -> TaskKind {
        TaskKind::StartLive
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        let state = &self.deps.state;
        let cookies = state.cookies.snapshot();
        let room = state.room.snapshot();

        if room.room_id.is_empty() {
            return Err(StartLiveError::NoRoom.into());
        }
        if state.constants.read(|c| c.start_live_csrf) && cookies.csrf().is_none() {
            return Err(StartLiveError::MissingCsrf.into());
        }
        let area_code = self.resolve_area(room.area_code)?;

        let reply = self
            .deps
            .api
            .start_live(&cookies, &room.room_id, area_code)
            .await
            .context("Start live request failed")?;

        match reply.code {
            0 => {
                tracing::info!("Live started in room {} (area {})", room.room_id, area_code);
                state.stream.update(|stream| {
                    stream.live_status = true;
                    stream.required_face = false;
                    stream.stream_addr = reply.addr;
                    stream.stream_key = reply.key;
                });
                Ok(())
            }
            LIVE_FACE_REQUIRED => {
                tracing::info!("Face verification required before going live");
                state.stream.update(|stream| {
                    stream.required_face = true;
                    stream.face_url = reply.face_url;
                });
                Ok(())
            }
            code => Err(StartLiveError::Rejected {
                code,
                message: reply.message,
            }
            .into()),
        }
    }
}

/// Closes the current broadcast.
pub struct StopLive {
    deps: TaskDeps,
}

impl StopLive {
    pub fn new(deps: TaskDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Task for StopLive {
    fn kind(&self) -> TaskKind {
        TaskKind::StopLive
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        let state = &self.deps.state;
        let cookies = state.cookies.snapshot();
        let room_id = state.room.read(|room| room.room_id.clone());

        if room_id.is_empty() {
            return Err(StopLiveError::NoRoom.into());
        }
        if state.constants.read(|c| c.stop_live_csrf) && cookies.csrf().is_none() {
            return Err(StopLiveError::MissingCsrf.into());
        }

        let reply = self
            .deps
            .api
            .stop_live(&cookies, &room_id)
            .await
            .context("Stop live request failed")?;

        if !reply.is_ok() {
            return Err(StopLiveError::Rejected {
                code: reply.code,
                message: reply.message,
            }
            .into());
        }

        tracing::info!("Live stopped in room {}", room_id);
        state.stream.update(|stream| {
            stream.live_status = false;
            stream.stream_addr = None;
            stream.stream_key = None;
        });
        Ok(())
    }
}
