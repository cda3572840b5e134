//! Loopback control endpoint.
//!
//! Lets a streaming tool start or stop the broadcast with a bare POST:
//!
//! ```text
//! POST /api/startLive  -> 200 "OK"
//! POST /api/stopLive   -> 200 "OK"
//! anything else        -> 404 "Not Found."
//! ```
//!
//! Handlers only forward a [`ControlCommand`]; the controller thread picks it
//! up on its next tick.

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use std::net::SocketAddr;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Default loopback address of the control endpoint.
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:24940";

/// Requests the controller handles on its own thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Go live; `area` is a child area name, `None` keeps the room's area.
    StartLive { area: Option<String> },
    StopLive,
    UpdateTitle(String),
    UpdateAnnounce(String),
    /// Move the room to a child area of the catalog.
    ChangeArea(String),
    FetchRecentAreas,
    RetryLogin,
    SwitchAccount(usize),
    AddAccount,
    Logout,
    ClearCredentials,
    Shutdown,
}

/// Cloneable sending side of the controller's command queue.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<ControlCommand>,
}

impl CommandSender {
    pub fn new(tx: mpsc::UnboundedSender<ControlCommand>) -> Self {
        Self { tx }
    }

    /// Returns false once the controller is gone.
    pub fn send(&self, command: ControlCommand) -> bool {
        match self.tx.send(command) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Controller gone, dropping {:?}", e.0);
                false
            }
        }
    }
}

/// Router with the two control routes and a 404 fallback.
pub fn router(commands: CommandSender) -> Router {
    Router::new()
        .route("/api/startLive", post(start_live).fallback(not_found))
        .route("/api/stopLive", post(stop_live).fallback(not_found))
        .fallback(not_found)
        .with_state(commands)
}

/// Running control endpoint.
pub struct ControlServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ControlServer {
    /// Bind `addr` and serve the control routes on the current runtime.
    ///
    /// Port 0 binds an ephemeral port; see [`local_addr`](Self::local_addr).
    pub async fn start(addr: &str, commands: CommandSender) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind control endpoint on {}", addr))?;
        let addr = listener
            .local_addr()
            .context("Failed to read control endpoint address")?;
        tracing::info!("Control endpoint listening on http://{}", addr);

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let app = router(commands);
        let handle = tokio::spawn(async move {
            let graceful = async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(graceful)
                .await
            {
                tracing::error!("Control endpoint error: {}", e);
            }
        });

        Ok(Self {
            addr,
            shutdown,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for the server task.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.handle.await {
            tracing::warn!("Control endpoint task ended abnormally: {}", e);
        }
        tracing::info!("Control endpoint stopped");
    }
}

async fn start_live(State(commands): State<CommandSender>) -> impl IntoResponse {
    tracing::info!("Control endpoint: start live");
    commands.send(ControlCommand::StartLive { area: None });
    (StatusCode::OK, "OK")
}

async fn stop_live(State(commands): State<CommandSender>) -> impl IntoResponse {
    tracing::info!("Control endpoint: stop live");
    commands.send(ControlCommand::StopLive);
    (StatusCode::OK, "OK")
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found.")
}
