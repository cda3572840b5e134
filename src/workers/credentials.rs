use super::TaskDeps;
use crate::credentials::CredentialError;
use crate::tasks::{Task, TaskContext, TaskKind};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Loads settings and the selected account at the start of a session.
///
/// Leaves one of three outcomes in `scan`: `scanned` (account valid),
/// `expired` (identity check rejected, body fails with
/// [`CredentialError::Expired`]) or `is_new` (new-account slot or nothing
/// stored at the position).
pub struct CredentialManager {
    deps: TaskDeps,
    position: usize,
    is_new: bool,
}

impl CredentialManager {
    pub fn new(deps: TaskDeps, position: usize, is_new: bool) -> Self {
        Self {
            deps,
            position,
            is_new,
        }
    }

    fn load_settings(&self) -> Result<()> {
        let store = &self.deps.store;
        let state = &self.deps.state;

        match store
            .load_obs_settings()
            .context("Failed to read OBS settings")?
        {
            Some(settings) => {
                tracing::info!("OBS settings loaded");
                state.obs_settings.replace(settings);
            }
            None => {
                tracing::info!("OBS default settings loaded");
                state.obs_settings.reset();
            }
        }

        if let Some(settings) = store
            .load_app_settings()
            .context("Failed to read app settings")?
        {
            state.app_settings.replace(settings);
        }

        if store.drop_legacy_room_info()? {
            tracing::info!("Dropped legacy room info entry");
        }
        state.room.reset();
        Ok(())
    }

    fn mark_new(&self) {
        self.deps.state.cookies.reset();
        self.deps.state.scan.update(|scan| scan.is_new = true);
    }
}

#[async_trait]
impl Task for CredentialManager {
    fn kind(&self) -> TaskKind {
        TaskKind::CredentialManager
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        self.load_settings()?;

        let accounts = self
            .deps
            .store
            .list_accounts()
            .context("Failed to read credential index")?;
        tracing::info!("Credential index loaded: {} account(s)", accounts.len());
        self.deps.state.accounts.update(|cache| cache.reload(accounts));

        if self.is_new {
            tracing::info!("New account slot selected, skipping stored credentials");
            self.mark_new();
            return Ok(());
        }

        match self
            .deps
            .store
            .load_account(self.position, self.deps.api.as_ref())
            .await
        {
            Ok(account) => {
                tracing::info!("Stored account {} is valid", account.key);
                self.deps.state.accounts.update(|cache| {
                    cache
                        .usernames
                        .insert(account.key.clone(), account.display_name.clone());
                });
                self.deps.state.cookies.replace(account.bundle);
                self.deps.state.scan.update(|scan| scan.scanned = true);
                Ok(())
            }
            Err(CredentialError::Missing(position)) => {
                tracing::info!("No stored account at position {}", position);
                self.mark_new();
                Ok(())
            }
            Err(err @ CredentialError::Expired { .. }) => {
                self.deps.state.scan.update(|scan| scan.expired = true);
                Err(err.into())
            }
            Err(err) => Err(err).context("Failed to load stored account"),
        }
    }
}
