// StartLive - login, credential and background task core of the streaming companion
//
// This is the library crate containing the scheduler, login flow, credential
// storage and platform client. The binary crate (main.rs) runs it headless.

pub mod config;
pub mod credentials;
pub mod logging;
pub mod login;
pub mod metrics;
pub mod models;
pub mod services;
pub mod sign;
pub mod state;
pub mod tasks;
pub mod ui;
pub mod workers;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use credentials::{CredentialError, CredentialStore, FileVault, MemoryVault, SecretVault};
pub use login::{LoginFlow, LoginPhase};
pub use models::{CookieBundle, LaunchConfig, PlatformConstants, ScanStatus};
pub use sign::RequestSigner;
pub use state::SharedState;
pub use tasks::{Callbacks, Scheduler, Task, TaskKind};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
