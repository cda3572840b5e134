use super::{RoomEditError, TaskDeps};
use crate::models::CookieBundle;
use crate::tasks::{Task, TaskContext, TaskKind};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Session cookies with a csrf token, for calls that change the room.
fn editing_session(deps: &TaskDeps) -> Result<CookieBundle, RoomEditError> {
    let cookies = deps.state.cookies.snapshot();
    if cookies.csrf().is_none() {
        return Err(RoomEditError::MissingCsrf);
    }
    Ok(cookies)
}

fn room_id(deps: &TaskDeps) -> Result<String, RoomEditError> {
    let room_id = deps.state.room.read(|room| room.room_id.clone());
    if room_id.is_empty() {
        return Err(RoomEditError::NoRoom);
    }
    Ok(room_id)
}

/// Renames the room.
///
/// The platform may rewrite the title during review; the version it keeps
/// becomes `room.title`, moves to the front of the title history and the
/// history is saved for the account.
pub struct UpdateTitle {
    deps: TaskDeps,
    title: String,
    epoch: u64,
}

impl UpdateTitle {
    pub fn new(deps: TaskDeps, title: impl Into<String>) -> Self {
        let epoch = deps.state.epoch();
        Self {
            deps,
            title: title.into(),
            epoch,
        }
    }
}

#[async_trait]
impl Task for UpdateTitle {
    fn kind(&self) -> TaskKind {
        TaskKind::UpdateTitle
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        let requested = self.title.trim();
        if requested.is_empty() {
            return Err(RoomEditError::EmptyTitle.into());
        }
        let room_id = room_id(&self.deps)?;
        let cookies = editing_session(&self.deps)?;

        let reply = self
            .deps
            .api
            .update_title(&cookies, &room_id, requested)
            .await
            .context("Title update request failed")?;
        if reply.code != 0 {
            return Err(RoomEditError::Rejected {
                code: reply.code,
                message: reply.message,
            }
            .into());
        }
        if self.deps.superseded(self.epoch, TaskKind::UpdateTitle) {
            return Ok(());
        }

        let title = reply
            .audit_title
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| requested.to_string());
        tracing::info!("Room {} renamed to {:?}", room_id, title);
        let recent = self.deps.state.room.update(|room| {
            room.remember_title(&title);
            room.title = title;
            room.recent_titles.clone()
        });

        if let Some(uid) = cookies.uid() {
            self.deps.config.save_recent_titles(uid, &recent)?;
        }
        Ok(())
    }
}

/// Replaces the room announcement.
pub struct UpdateAnnounce {
    deps: TaskDeps,
    content: String,
    epoch: u64,
}

impl UpdateAnnounce {
    pub fn new(deps: TaskDeps, content: impl Into<String>) -> Self {
        let epoch = deps.state.epoch();
        Self {
            deps,
            content: content.into(),
            epoch,
        }
    }
}

#[async_trait]
impl Task for UpdateAnnounce {
    fn kind(&self) -> TaskKind {
        TaskKind::UpdateAnnounce
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        let cookies = editing_session(&self.deps)?;
        let reply = self
            .deps
            .api
            .update_announce(&cookies, &self.content)
            .await
            .context("Announcement update request failed")?;
        if !reply.is_ok() {
            return Err(RoomEditError::Rejected {
                code: reply.code,
                message: reply.message,
            }
            .into());
        }
        if self.deps.superseded(self.epoch, TaskKind::UpdateAnnounce) {
            return Ok(());
        }

        tracing::info!("Announcement updated ({} chars)", self.content.chars().count());
        let Self { deps, content, .. } = *self;
        deps.state.room.update(|room| room.announcement = content);
        Ok(())
    }
}

/// Moves the room to another child area of the catalog.
pub struct UpdateArea {
    deps: TaskDeps,
    area: String,
    epoch: u64,
}

impl UpdateArea {
    /// `area` is a child area name from the catalog.
    pub fn new(deps: TaskDeps, area: impl Into<String>) -> Self {
        let epoch = deps.state.epoch();
        Self {
            deps,
            area: area.into(),
            epoch,
        }
    }
}

#[async_trait]
impl Task for UpdateArea {
    fn kind(&self) -> TaskKind {
        TaskKind::UpdateArea
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        let (code, parent) = self
            .deps
            .state
            .areas
            .read(|areas| {
                areas
                    .code_of(&self.area)
                    .map(|code| (code, areas.parents.get(&self.area).cloned().unwrap_or_default()))
            })
            .ok_or_else(|| RoomEditError::UnknownArea(self.area.clone()))?;
        let room_id = room_id(&self.deps)?;
        let cookies = editing_session(&self.deps)?;

        let reply = self
            .deps
            .api
            .change_area(&cookies, &room_id, code)
            .await
            .context("Area change request failed")?;
        if !reply.is_ok() {
            return Err(RoomEditError::Rejected {
                code: reply.code,
                message: reply.message,
            }
            .into());
        }
        if self.deps.superseded(self.epoch, TaskKind::UpdateArea) {
            return Ok(());
        }

        tracing::info!("Room {} moved to {} / {} ({})", room_id, parent, self.area, code);
        let Self { deps, area, .. } = *self;
        deps.state.room.update(|room| {
            room.parent_area = parent;
            room.area = area;
            room.area_code = code;
        });
        Ok(())
    }
}

/// Reads the account's saved title history into `room.recent_titles`.
pub struct LoadRecentTitles {
    deps: TaskDeps,
    epoch: u64,
}

impl LoadRecentTitles {
    pub fn new(deps: TaskDeps) -> Self {
        let epoch = deps.state.epoch();
        Self { deps, epoch }
    }
}

#[async_trait]
impl Task for LoadRecentTitles {
    fn kind(&self) -> TaskKind {
        TaskKind::LoadRecentTitles
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        let cookies = self.deps.state.cookies.snapshot();
        let Some(uid) = cookies.uid() else {
            tracing::debug!("No account id, skipping title history");
            return Ok(());
        };
        let titles = self.deps.config.load_recent_titles(uid)?;
        if self.deps.superseded(self.epoch, TaskKind::LoadRecentTitles) {
            return Ok(());
        }

        self.deps
            .state
            .room
            .update(|room| room.merge_recent_titles(titles));
        Ok(())
    }
}

/// Areas the room streamed in recently; replaces `room.recent_areas`.
pub struct FetchRecentAreas {
    deps: TaskDeps,
    epoch: u64,
}

impl FetchRecentAreas {
    pub fn new(deps: TaskDeps) -> Self {
        let epoch = deps.state.epoch();
        Self { deps, epoch }
    }
}

#[async_trait]
impl Task for FetchRecentAreas {
    fn kind(&self) -> TaskKind {
        TaskKind::FetchRecentAreas
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        let room_id = room_id(&self.deps)?;
        let cookies = self.deps.state.cookies.snapshot();
        let areas = self
            .deps
            .api
            .recent_areas(&cookies, &room_id)
            .await
            .context("Failed to fetch recent areas")?;
        if self.deps.superseded(self.epoch, TaskKind::FetchRecentAreas) {
            return Ok(());
        }

        tracing::debug!("{} recent areas", areas.len());
        self.deps.state.room.update(|room| room.recent_areas = areas);
        Ok(())
    }
}
