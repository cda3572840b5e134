use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Launch configuration from `StartLive.yaml`, overridable with `STARTLIVE_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Bind address of the local control endpoint; disabled when unset.
    pub control_host: Option<String>,

    /// Port of the local control endpoint; disabled when unset.
    pub control_port: Option<u16>,

    /// Skip the remote platform-constants refresh.
    pub no_const_update: bool,

    pub debug_mode: bool,

    pub log_dir: String,

    /// Delay between QR poll requests, in milliseconds.
    pub poll_interval_ms: u64,

    pub worker_threads: usize,

    /// Where account cookies and settings are kept.
    pub vault: VaultBackend,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            control_host: None,
            control_port: None,
            no_const_update: false,
            debug_mode: false,
            log_dir: "logs".to_string(),
            poll_interval_ms: 1000,
            worker_threads: 4,
            vault: VaultBackend::Keyring,
        }
    }
}

/// Secret storage selected at launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultBackend {
    /// The operating system's credential store.
    #[default]
    Keyring,
    /// Plaintext JSON file in the data directory.
    File,
}

impl LaunchConfig {
    /// `host:port` of the control endpoint, when both halves are configured.
    pub fn control_addr(&self) -> Option<String> {
        match (&self.control_host, self.control_port) {
            (Some(host), Some(port)) => Some(format!("{host}:{port}")),
            _ => None,
        }
    }
}

/// Request constants of the official client.
///
/// Compiled-in defaults are replaced by the remote `version.json` once the
/// constants refresh task succeeds. Field names follow that file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConstants {
    #[serde(rename = "ak")]
    pub app_key: String,

    #[serde(rename = "as")]
    pub app_secret: String,

    #[serde(rename = "b")]
    pub build: String,

    #[serde(rename = "v")]
    pub version: String,

    #[serde(rename = "hw")]
    pub headers_web: IndexMap<String, String>,

    #[serde(rename = "ha")]
    pub headers_app: IndexMap<String, String>,

    #[serde(rename = "start_ac")]
    pub start_live_csrf: bool,

    #[serde(rename = "stop_ac")]
    pub stop_live_csrf: bool,
}

impl Default for PlatformConstants {
    fn default() -> Self {
        let build = "9600";
        let version = "7.24.0.9600";

        let headers_web: IndexMap<String, String> = [
            ("Accept", "*/*"),
            ("Accept-Language", "zh-CN,zh;q=0.9"),
            ("Origin", "https://live.bilibili.com"),
            ("Referer", "https://live.bilibili.com/"),
            (
                "User-Agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/105.0.0.0 Safari/537.36 pc_app/livehime build/9600",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let headers_app: IndexMap<String, String> = [(
            "User-Agent".to_string(),
            format!("LiveHime/{version} os/Windows pc_app/livehime build/{build} osVer/10.0_x86_64"),
        )]
        .into_iter()
        .collect();

        Self {
            app_key: "aae92bc66f3edfab".to_string(),
            app_secret: "af125a0d5279fd576c1b4418a3e8276d".to_string(),
            build: build.to_string(),
            version: version.to_string(),
            headers_web,
            headers_app,
            start_live_csrf: true,
            stop_live_csrf: false,
        }
    }
}
