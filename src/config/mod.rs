use crate::models::LaunchConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::fs;

/// Launch settings file inside the data directory.
pub const LAUNCH_CONFIG_FILE: &str = "StartLive.yaml";

/// Prefix of environment overrides (`STARTLIVE_CONTROL_PORT=8080`).
pub const ENV_PREFIX: &str = "STARTLIVE";

/// File-backed secret vault inside the data directory.
pub const VAULT_FILE: &str = "credentials.json";

/// Configuration manager for the StartLive data directory.
///
/// Manages:
/// - Launch settings (`StartLive.yaml`), layered with `STARTLIVE_*` environment overrides
/// - The cached platform constants (`config/version.json`)
/// - Per-account title history (`config/title<uid>`)
/// - Locations of the file vault and log directory
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    launch_config_path: Utf8PathBuf,
    constants_cache_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified data directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory holding configuration files (e.g., "StartLive Data")
    ///
    /// # Returns
    /// A new ConfigManager instance
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            launch_config_path: config_dir.join(LAUNCH_CONFIG_FILE),
            constants_cache_path: config_dir.join("config").join("version.json"),
            config_dir,
        })
    }

    /// Load launch settings from the YAML file and the process environment.
    ///
    /// # Returns
    /// The merged LaunchConfig; defaults fill whatever neither source sets
    pub fn load_launch_config(&self) -> Result<LaunchConfig> {
        self.load_launch_config_with_env(None)
    }

    /// Load launch settings with an explicit environment instead of the process one.
    ///
    /// # Arguments
    /// * `env` - Variables to read overrides from; `None` reads the process environment
    pub fn load_launch_config_with_env(
        &self,
        env: Option<HashMap<String, String>>,
    ) -> Result<LaunchConfig> {
        if !self.launch_config_path.exists() {
            tracing::warn!(
                "Launch config file not found at {}, using defaults",
                self.launch_config_path
            );
        }

        let settings = config::Config::builder()
            .add_source(
                config::File::from(self.launch_config_path.as_std_path())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| {
                format!("Failed to read launch config: {}", self.launch_config_path)
            })?;

        let config: LaunchConfig = settings.try_deserialize().with_context(|| {
            format!("Failed to parse launch config: {}", self.launch_config_path)
        })?;

        tracing::info!("Loaded launch config from {}", self.launch_config_path);
        Ok(config)
    }

    /// Save the launch settings file.
    ///
    /// # Arguments
    /// * `config` - The LaunchConfig to save
    pub fn save_launch_config(&self, config: &LaunchConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize launch config to YAML")?;

        fs::write(&self.launch_config_path, yaml_string).with_context(|| {
            format!("Failed to write launch config: {}", self.launch_config_path)
        })?;

        tracing::info!("Saved launch config to {}", self.launch_config_path);
        Ok(())
    }

    /// Load the cached `version.json`, if a previous refresh wrote one.
    pub fn load_cached_constants(&self) -> Result<Option<serde_json::Value>> {
        if !self.constants_cache_path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.constants_cache_path).with_context(|| {
            format!("Failed to read constants cache: {}", self.constants_cache_path)
        })?;
        let value = serde_json::from_str(&contents).with_context(|| {
            format!("Failed to parse constants cache: {}", self.constants_cache_path)
        })?;

        tracing::debug!("Loaded constants cache from {}", self.constants_cache_path);
        Ok(Some(value))
    }

    /// Overwrite the cached `version.json`.
    pub fn save_cached_constants(&self, value: &serde_json::Value) -> Result<()> {
        if let Some(parent) = self.constants_cache_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {}", parent))?;
        }

        let json = serde_json::to_string(value).context("Failed to serialize constants")?;
        fs::write(&self.constants_cache_path, json).with_context(|| {
            format!("Failed to write constants cache: {}", self.constants_cache_path)
        })?;

        tracing::info!("Saved constants cache to {}", self.constants_cache_path);
        Ok(())
    }

    /// Title history file of the account `uid`.
    pub fn title_history_path(&self, uid: &str) -> Utf8PathBuf {
        self.cache_dir().join(format!("title{uid}"))
    }

    /// Titles recently used by `uid`, most recent first; empty when none
    /// were saved.
    pub fn load_recent_titles(&self, uid: &str) -> Result<Vec<String>> {
        let path = self.title_history_path(uid);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read title history: {}", path))?;
        tracing::info!("Loaded recent titles from {}", path);
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn save_recent_titles(&self, uid: &str, titles: &[String]) -> Result<()> {
        let path = self.title_history_path(uid);
        fs::create_dir_all(self.cache_dir())
            .with_context(|| format!("Failed to create cache directory: {}", self.cache_dir()))?;
        fs::write(&path, titles.join("\n"))
            .with_context(|| format!("Failed to write title history: {}", path))?;

        tracing::debug!("Saved {} recent titles to {}", titles.len(), path);
        Ok(())
    }

    /// Delete the title history of `uid`; returns whether one existed.
    pub fn remove_recent_titles(&self, uid: &str) -> Result<bool> {
        let path = self.title_history_path(uid);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove title history: {}", path))?;
        Ok(true)
    }

    fn cache_dir(&self) -> Utf8PathBuf {
        self.config_dir.join("config")
    }

    /// Location of the file-backed vault.
    pub fn vault_path(&self) -> Utf8PathBuf {
        self.config_dir.join(VAULT_FILE)
    }

    /// Log directory, resolved against the data directory when relative.
    pub fn log_dir(&self, config: &LaunchConfig) -> Utf8PathBuf {
        let log_dir = Utf8Path::new(&config.log_dir);
        if log_dir.is_absolute() {
            log_dir.to_path_buf()
        } else {
            self.config_dir.join(log_dir)
        }
    }

    pub fn constants_cache_path(&self) -> &Utf8Path {
        &self.constants_cache_path
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}
