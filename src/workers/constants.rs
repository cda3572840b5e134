use super::TaskDeps;
use crate::models::PlatformConstants;
use crate::tasks::{Task, TaskContext, TaskKind, TaskSignal};
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

static VERSION_PARTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("Invalid version regex"));

/// Numeric components of a version tag (`v0.6.0`, `0.6.0-beta.1`, ...).
fn version_parts(tag: &str) -> Vec<u64> {
    let core = tag.split(['-', '+']).next().unwrap_or_default();
    VERSION_PARTS
        .find_iter(core)
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Whether `latest` is a newer release than `current`.
///
/// Missing trailing components count as zero.
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    let latest = version_parts(latest);
    let current = version_parts(current);
    if latest.is_empty() {
        return false;
    }
    let len = latest.len().max(current.len());
    for i in 0..len {
        let a = latest.get(i).copied().unwrap_or(0);
        let b = current.get(i).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => {}
        }
    }
    false
}

/// Refreshes the request constants from the remote `version.json`.
///
/// The on-disk cache is applied first so a failed download still leaves the
/// last known constants in place. Sets `const_updated` on success.
pub struct ConstUpdate {
    deps: TaskDeps,
}

impl ConstUpdate {
    pub fn new(deps: TaskDeps) -> Self {
        Self { deps }
    }

    fn apply_cache(&self) {
        match self.deps.config.load_cached_constants() {
            Ok(Some(cached)) => match serde_json::from_value::<PlatformConstants>(cached) {
                Ok(constants) => {
                    tracing::info!("Applied cached constants (build {})", constants.build);
                    self.deps.state.constants.replace(constants);
                }
                Err(e) => tracing::warn!("Ignoring malformed constants cache: {}", e),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!("Could not read constants cache: {:#}", e),
        }
    }
}

#[async_trait]
impl Task for ConstUpdate {
    fn kind(&self) -> TaskKind {
        TaskKind::ConstUpdate
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        self.apply_cache();

        let remote = self
            .deps
            .api
            .remote_constants()
            .await
            .context("Failed to download version.json")?;
        let constants: PlatformConstants =
            serde_json::from_value(remote.clone()).context("Malformed version.json")?;
        tracing::info!(
            "Constants updated to build {} ({})",
            constants.build,
            constants.version
        );

        self.deps.state.constants.replace(constants);
        self.deps.config.save_cached_constants(&remote)?;
        self.deps.state.scan.update(|scan| scan.const_updated = true);
        Ok(())
    }
}

/// Compares the running version with the latest release tag.
///
/// Emits [`TaskSignal::NewVersion`] when a newer release exists.
pub struct VersionCheck {
    deps: TaskDeps,
    current: String,
}

impl VersionCheck {
    pub fn new(deps: TaskDeps) -> Self {
        Self::with_current(deps, crate::VERSION)
    }

    pub fn with_current(deps: TaskDeps, current: &str) -> Self {
        Self {
            deps,
            current: current.to_string(),
        }
    }
}

#[async_trait]
impl Task for VersionCheck {
    fn kind(&self) -> TaskKind {
        TaskKind::VersionCheck
    }

    async fn run(self: Box<Self>, ctx: TaskContext) -> Result<()> {
        let latest = self
            .deps
            .api
            .latest_release()
            .await
            .context("Failed to fetch latest release")?;

        if is_newer_version(&latest, &self.current) {
            tracing::info!("New version available: {}", latest);
            ctx.emit(TaskSignal::NewVersion(latest));
        } else {
            tracing::debug!("Running version {} is current", self.current);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parts() {
        assert_eq!(version_parts("v0.6.0"), vec![0, 6, 0]);
        assert_eq!(version_parts("1.2.3-beta.4"), vec![1, 2, 3]);
        assert!(version_parts("latest").is_empty());
    }

    #[test]
    fn test_is_newer_version() {
        assert!(is_newer_version("v0.6.1", "0.6.0"));
        assert!(is_newer_version("1.0", "0.9.9"));
        assert!(!is_newer_version("v0.6.0", "0.6.0"));
        assert!(!is_newer_version("0.6", "0.6.0"));
        assert!(!is_newer_version("0.5.9", "0.6.0"));
        assert!(!is_newer_version("nightly", "0.6.0"));
    }
}
