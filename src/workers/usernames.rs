use super::TaskDeps;
use crate::models::username_display;
use crate::tasks::{Task, TaskContext, TaskKind};
use anyhow::Result;
use async_trait::async_trait;

/// Resolves display names for every stored account except `skip`.
///
/// Calls are spaced by `request_spacing`. Accounts whose secret is gone or
/// whose session was rejected keep their key as display name.
pub struct FetchUsernames {
    deps: TaskDeps,
    skip: Option<String>,
}

impl FetchUsernames {
    pub fn new(deps: TaskDeps, skip: Option<String>) -> Self {
        Self { deps, skip }
    }
}

#[async_trait]
impl Task for FetchUsernames {
    fn kind(&self) -> TaskKind {
        TaskKind::FetchUsernames
    }

    async fn run(self: Box<Self>, ctx: TaskContext) -> Result<()> {
        let state = &self.deps.state;
        if !state.scan.read(|scan| scan.scanned) {
            tracing::debug!("Not logged in, skipping username lookup");
            return Ok(());
        }

        let keys = state.accounts.read(|cache| cache.keys.clone());
        let mut resolved = 0usize;
        for key in keys {
            if self.skip.as_deref() == Some(key.as_str()) {
                continue;
            }
            let bundle = match self.deps.store.read_bundle(&key) {
                Ok(Some(bundle)) => bundle,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Could not read credentials of {}: {}", key, e);
                    continue;
                }
            };

            if !ctx.sleep(self.deps.request_spacing).await {
                break;
            }

            match self.deps.api.nav(&bundle).await {
                Ok(nav) if nav.is_valid() => {
                    let display = username_display(&nav.uname, nav.mid);
                    state.accounts.update(|cache| {
                        cache.usernames.insert(key.clone(), display);
                    });
                    resolved += 1;
                }
                Ok(nav) => tracing::debug!("Session of {} rejected ({})", key, nav.code),
                Err(e) => tracing::warn!("Username lookup for {} failed: {}", key, e),
            }
        }

        tracing::info!("Resolved {} account name(s)", resolved);
        Ok(())
    }
}
