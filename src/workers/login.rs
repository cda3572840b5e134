use super::{LoginError, TaskDeps};
use crate::services::api::{QR_EXPIRED, QR_NOT_CONFIRMED, QR_NOT_SCANNED};
use crate::tasks::{Lifetime, Task, TaskContext, TaskKind, TaskSignal};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// How often the poll task checks whether a QR key arrived.
const QR_KEY_WAIT: Duration = Duration::from_millis(100);

/// Requests a fresh QR login code.
pub struct FetchQr {
    deps: TaskDeps,
}

impl FetchQr {
    pub fn new(deps: TaskDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Task for FetchQr {
    fn kind(&self) -> TaskKind {
        TaskKind::FetchQr
    }

    async fn run(self: Box<Self>, _ctx: TaskContext) -> Result<()> {
        let qr = self
            .deps
            .api
            .generate_qr()
            .await
            .context("Failed to generate QR code")?;
        tracing::info!("QR code generated");

        self.deps.state.scan.update(|scan| {
            scan.qr_key = Some(qr.key);
            scan.qr_url = Some(qr.url);
            scan.timeout = false;
        });
        Ok(())
    }
}

/// Polls the QR login status until scanned, expired or stopped.
///
/// The stop flag is checked after every remote call, so a stopped instance
/// never writes shared state again.
pub struct PollLogin {
    deps: TaskDeps,
}

impl PollLogin {
    pub fn new(deps: TaskDeps) -> Self {
        Self { deps }
    }

    async fn wait_for_key(&self, ctx: &TaskContext) -> Option<String> {
        loop {
            if !ctx.is_running() {
                return None;
            }
            if let Some(key) = self.deps.state.scan.read(|scan| scan.qr_key.clone()) {
                return Some(key);
            }
            ctx.sleep(QR_KEY_WAIT).await;
        }
    }

    fn complete_login(&self, ctx: &TaskContext, cookies: crate::models::CookieBundle) -> Result<()> {
        let state = &self.deps.state;
        state.cookies.replace(cookies.clone());

        let key = self
            .deps
            .store
            .add_account(&cookies)
            .context("Failed to store new account")?;
        state.accounts.update(|cache| {
            if !cache.keys.contains(&key) {
                cache.keys.push(key.clone());
            }
            cache.usernames.entry(key.clone()).or_insert_with(|| key.clone());
        });

        state.scan.update(|scan| scan.scanned = true);
        tracing::info!("QR login confirmed for {}", key);
        ctx.emit(TaskSignal::QrScanned);
        Ok(())
    }
}

#[async_trait]
impl Task for PollLogin {
    fn kind(&self) -> TaskKind {
        TaskKind::PollLogin
    }

    fn lifetime(&self) -> Lifetime {
        Lifetime::LongLived
    }

    async fn run(self: Box<Self>, ctx: TaskContext) -> Result<()> {
        let Some(qr_key) = self.wait_for_key(&ctx).await else {
            tracing::info!("Login polling stopped before a QR code arrived");
            return Ok(());
        };

        let state = &self.deps.state;
        while ctx.is_running() && !state.scan.read(|scan| scan.scanned) {
            let poll = self
                .deps
                .api
                .poll_qr(&qr_key)
                .await
                .context("QR poll request failed")?;

            if !ctx.is_running() {
                tracing::info!("Discarding QR poll result of a stopped task");
                break;
            }

            match poll.code {
                QR_NOT_SCANNED => {
                    tracing::debug!("QR code not scanned yet");
                }
                QR_NOT_CONFIRMED => {
                    tracing::debug!("QR code scanned, waiting for confirmation");
                    state.scan.update(|scan| scan.wait_for_confirm = true);
                    ctx.emit(TaskSignal::QrNotConfirmed);
                }
                QR_EXPIRED => {
                    tracing::info!("QR code expired");
                    state.scan.update(|scan| scan.timeout = true);
                    ctx.emit(TaskSignal::QrExpired);
                    break;
                }
                0 => {
                    self.complete_login(&ctx, poll.cookies)?;
                    break;
                }
                code => {
                    return Err(LoginError::Rejected {
                        code,
                        message: poll.message,
                    }
                    .into());
                }
            }

            if !ctx.sleep(self.deps.poll_interval).await {
                break;
            }
        }
        Ok(())
    }
}
