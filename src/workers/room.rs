use super::{RoomStatusError, TaskDeps};
use crate::models::AreaCatalog;
use crate::tasks::{Task, TaskContext, TaskKind};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Live categories; sets `area_updated`.
pub struct FetchArea {
    deps: TaskDeps,
    epoch: u64,
}

impl FetchArea {
    pub fn new(deps: TaskDeps) -> Self {
        let epoch = deps.state.epoch();
        Self { deps, epoch }
    }
}

#[async_trait]
impl Task for FetchArea {
    fn kind(&self) -> TaskKind {
        TaskKind::FetchArea
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        let cookies = self.deps.state.cookies.snapshot();
        let groups = self
            .deps
            .api
            .area_list(&cookies)
            .await
            .context("Failed to fetch area list")?;

        let mut catalog = AreaCatalog::default();
        for group in groups {
            catalog.options.entry(group.name.clone()).or_default();
            for child in group.children {
                catalog.insert(&group.name, &child.name, child.id);
            }
        }
        if self.deps.superseded(self.epoch, TaskKind::FetchArea) {
            return Ok(());
        }
        tracing::info!("Area list loaded: {} parent areas", catalog.options.len());

        self.deps.state.areas.replace(catalog);
        self.deps.state.scan.update(|scan| scan.area_updated = true);
        Ok(())
    }
}

/// Room title, id, live flag and area; sets `room_updated`.
pub struct FetchRoom {
    deps: TaskDeps,
    epoch: u64,
}

impl FetchRoom {
    pub fn new(deps: TaskDeps) -> Self {
        let epoch = deps.state.epoch();
        Self { deps, epoch }
    }
}

#[async_trait]
impl Task for FetchRoom {
    fn kind(&self) -> TaskKind {
        TaskKind::FetchRoom
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        let cookies = self.deps.state.cookies.snapshot();
        let api = &self.deps.api;

        let title = api
            .pre_live(&cookies)
            .await
            .context("Failed to fetch room title")?;
        let snapshot = api
            .room_info(&cookies)
            .await
            .context("Failed to fetch room info")?;
        if self.deps.superseded(self.epoch, TaskKind::FetchRoom) {
            return Ok(());
        }
        tracing::info!(
            "Room {} loaded (live={})",
            snapshot.room_id,
            snapshot.live
        );

        self.deps.state.room.update(|room| {
            room.title = title;
            room.room_id = snapshot.room_id;
            room.parent_area = snapshot.parent_area;
            room.area = snapshot.area;
            room.area_code = snapshot.area_code;
        });
        self.deps
            .state
            .stream
            .update(|stream| stream.live_status = snapshot.live);
        self.deps.state.scan.update(|scan| scan.room_updated = true);
        Ok(())
    }
}

/// Room announcement; sets `announce_updated`.
pub struct FetchAnnounce {
    deps: TaskDeps,
    epoch: u64,
}

impl FetchAnnounce {
    pub fn new(deps: TaskDeps) -> Self {
        let epoch = deps.state.epoch();
        Self { deps, epoch }
    }
}

#[async_trait]
impl Task for FetchAnnounce {
    fn kind(&self) -> TaskKind {
        TaskKind::FetchAnnounce
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        let cookies = self.deps.state.cookies.snapshot();
        let announcement = self
            .deps
            .api
            .announce(&cookies)
            .await
            .context("Failed to fetch announcement")?;
        if self.deps.superseded(self.epoch, TaskKind::FetchAnnounce) {
            return Ok(());
        }

        self.deps
            .state
            .room
            .update(|room| room.announcement = announcement);
        self.deps
            .state
            .scan
            .update(|scan| scan.announce_updated = true);
        Ok(())
    }
}

/// Account-level live permission check. Does not gate readiness.
pub struct RoomStatusCheck {
    deps: TaskDeps,
}

impl RoomStatusCheck {
    pub fn new(deps: TaskDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Task for RoomStatusCheck {
    fn kind(&self) -> TaskKind {
        TaskKind::RoomStatusCheck
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        let cookies = self.deps.state.cookies.snapshot();
        let reply = self
            .deps
            .api
            .room_pre_live_status(&cookies)
            .await
            .context("Failed to check room status")?;

        if !reply.is_ok() {
            return Err(RoomStatusError {
                code: reply.code,
                message: reply.message,
            }
            .into());
        }
        Ok(())
    }
}
