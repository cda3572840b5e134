//! StartLive - headless runner for the streaming companion core
//!
//! # Overview
//!
//! Wires the library together without a window:
//! - Logging infrastructure (daily rotating file + console output)
//! - Tokio runtime for task bodies
//! - OS credential store (or the plaintext file fallback) and account index
//! - Platform HTTP client
//! - Controller (scheduler + login flow) on the main thread
//! - Optional loopback control endpoint
//!
//! View events go to the log, so the QR login URL shows up on the console.
//!
//! # Execution Flow
//!
//! 1. Load `StartLive Data/StartLive.yaml` (+ `STARTLIVE_*` overrides)
//! 2. Initialize logging
//! 3. Build the runtime, vault, store and API client
//! 4. Start the control endpoint when host and port are configured
//! 5. Start the login session for the first stored account
//! 6. Tick the controller until Ctrl+C
//! 7. Stop long-lived tasks, drain the pool, shut down

use anyhow::{Context, Result};
use startlive::credentials::{CredentialStore, FileVault, KeyringVault, SecretVault};
use startlive::logging::{LOG_PREFIX, setup_logging_with_console};
use startlive::models::VaultBackend;
use startlive::services::{HttpApi, PlatformApi};
use startlive::ui::{ControlCommand, ControlServer, Controller, LogPresenter};
use startlive::workers::TaskDeps;
use startlive::{APP_NAME, ConfigManager, Scheduler, SharedState, VERSION};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Data directory holding the launch config, vault and constants cache.
const DATA_DIR: &str = "StartLive Data";

/// How long one controller tick waits for task events.
const TICK: Duration = Duration::from_millis(100);

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let config_manager = ConfigManager::new(DATA_DIR)?;
    let launch = config_manager.load_launch_config()?;

    let _log_guard = setup_logging_with_console(
        &config_manager.log_dir(&launch),
        LOG_PREFIX,
        launch.debug_mode,
        true,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let worker_threads = launch.worker_threads.max(1);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(worker_threads)
        .thread_name("startlive-worker")
        .build()
        .context("Failed to build tokio runtime")?;

    tracing::info!(
        "Tokio runtime initialized with {} worker threads",
        worker_threads
    );

    let state = Arc::new(SharedState::new());

    let vault: Arc<dyn SecretVault> = match launch.vault {
        VaultBackend::Keyring => {
            let vault = KeyringVault::new();
            tracing::info!("Credentials kept in the OS credential store ({})", vault.service());
            Arc::new(vault)
        }
        VaultBackend::File => {
            tracing::warn!(
                "Credentials kept in plaintext at {}",
                config_manager.vault_path()
            );
            Arc::new(FileVault::new(config_manager.vault_path()))
        }
    };
    let store = Arc::new(CredentialStore::open(vault).context("Failed to open credential store")?);

    let api: Arc<dyn PlatformApi> =
        Arc::new(HttpApi::new(state.constants.clone()).context("Failed to build HTTP client")?);

    let deps = TaskDeps::new(state, api, store, Arc::new(config_manager))
        .with_poll_interval(Duration::from_millis(launch.poll_interval_ms));

    let scheduler = Scheduler::new(runtime.handle().clone());
    let mut controller = Controller::new(
        scheduler,
        deps,
        Rc::new(LogPresenter),
        !launch.no_const_update,
    );
    let commands = controller.command_sender();

    let interrupt = commands.clone();
    ctrlc::set_handler(move || {
        interrupt.send(ControlCommand::Shutdown);
    })
    .context("Failed to install Ctrl+C handler")?;

    let server = match launch.control_addr() {
        Some(addr) => Some(runtime.block_on(ControlServer::start(&addr, commands))?),
        None => {
            tracing::info!("Control endpoint disabled");
            None
        }
    };

    controller.start(0);
    while controller.tick(TICK) {}

    tracing::info!("Shutting down");
    controller.shutdown(SHUTDOWN_TIMEOUT);

    if let Some(server) = server {
        runtime.block_on(server.shutdown());
    }
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);

    tracing::info!("Application shutdown complete");
    Ok(())
}
