use std::collections::HashSet;
use std::time::Duration;
use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::window::ActiveWindow;
use crate::stores::{Platform, TrackedStore, load_url_list};
use crate::validation::{
    validate_concurrency, validate_probe_timeout, validate_store_id, validate_store_url,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    ReadFailed { path: path::PathBuf, source: io::Error },

    #[error("Failed to write {}: {source}", .path.display())]
    WriteFailed { path: path::PathBuf, source: io::Error },

    #[error("Failed to parse {}: {source}", .path.display())]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },

    #[error("Failed to serialize configuration: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("Failed to parse store list {}: {source}", .path.display())]
    StoreListFailed { path: path::PathBuf, source: serde_json::Error },

    #[error("No configuration path available: neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Optional JSON file with `{"urls": [...]}`, merged after `stores`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stores_file: Option<path::PathBuf>,
    pub window: WindowConfig,
    pub snapshot: SnapshotConfig,
    pub probe: ProbeConfig,
    pub cycle: CycleConfig,
    pub logging: LoggingConfig,
    pub stores: Vec<StoreEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub start_hour: u32,
    pub end_hour: u32,
    pub utc_offset_hours: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub directory: path::PathBuf,
    pub name: String,
    /// Informational: retention is enforced by whatever hosts the artifacts
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_seconds: u64,
    pub concurrency: usize,
    pub user_agent: String,
    pub closed_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Budget for the probing phase
    pub timeout_seconds: u64,
    /// Wall-clock budget for the whole run
    pub deadline_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// One `[[stores]]` entry; a missing `id` is derived from the URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { start_hour: 6, end_hour: 21, utc_offset_hours: 8 }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { directory: "snapshots".into(), name: "store-database".into(), retention_days: 90 }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            concurrency: 4,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36"
                .into(),
            closed_markers: vec![
                "Temporarily unavailable".into(),
                "Closed for now".into(),
                "Out of delivery area".into(),
            ],
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self { timeout_seconds: 1800, deadline_seconds: 3300 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stores_file: None,
            window: WindowConfig::default(),
            snapshot: SnapshotConfig::default(),
            probe: ProbeConfig::default(),
            cycle: CycleConfig::default(),
            logging: LoggingConfig::default(),
            stores: Vec::new(),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/storewatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Ok(home_dir) = env::var("HOME") {
        path::PathBuf::from(home_dir).join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("storewatch/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Window")?;
        write_1(f, "Start Hour", &self.window.start_hour)?;
        write_1(f, "End Hour", &self.window.end_hour)?;
        write_1(f, "UTC Offset (hours)", &self.window.utc_offset_hours)?;
        write_title_1(f, "Snapshot")?;
        write_1(f, "Directory", &self.snapshot.directory.display())?;
        write_1(f, "Name", &self.snapshot.name)?;
        write_1(f, "Retention (days)", &self.snapshot.retention_days)?;
        write_title_1(f, "Probe")?;
        write_1(f, "Timeout (s)", &self.probe.timeout_seconds)?;
        write_1(f, "Concurrency", &self.probe.concurrency)?;
        write_1(f, "Closed Markers", &self.probe.closed_markers.join(", "))?;
        write_title_1(f, "Cycle")?;
        write_1(f, "Timeout (s)", &self.cycle.timeout_seconds)?;
        write_1(f, "Deadline (s)", &self.cycle.deadline_seconds)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_title_1(f, "Stores")?;
        write_1(f, "Configured", &self.stores.len())?;
        if let Some(file) = &self.stores_file {
            write_1(f, "Store List File", &file.display())?;
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/storewatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Self::from_toml_str(&raw_string)
                .map_err(|source| ConfigError::ParseFailed { path: config_path.clone(), source })?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Check every section; all problems are reported together
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if let Err(e) = self.active_window() {
            problems.push(e.to_string());
        }
        let checks = [
            validate_concurrency(self.probe.concurrency).into_result("probe.concurrency"),
            validate_probe_timeout(self.probe.timeout_seconds, self.cycle.timeout_seconds)
                .into_result("probe.timeout_seconds"),
        ];
        problems.extend(checks.into_iter().filter_map(Result::err));

        if self.cycle.deadline_seconds < self.cycle.timeout_seconds {
            problems.push("cycle.deadline_seconds must not be shorter than cycle.timeout_seconds".into());
        }
        if self.snapshot.name.trim().is_empty() {
            problems.push("snapshot.name cannot be empty".into());
        }

        for (index, entry) in self.stores.iter().enumerate() {
            if let Err(e) = validate_store_url(&entry.url).into_result(&format!("stores[{index}].url")) {
                problems.push(e);
            }
            if let Some(id) = &entry.id {
                if let Err(e) = validate_store_id(id).into_result(&format!("stores[{index}].id")) {
                    problems.push(e);
                }
            }
        }

        if problems.is_empty() { Ok(()) } else { Err(ConfigError::Invalid(problems.join("; "))) }
    }

    pub fn active_window(&self) -> Result<ActiveWindow, ConfigError> {
        ActiveWindow::new(self.window.start_hour, self.window.end_hour, self.window.utc_offset_hours)
            .map_err(|e| ConfigError::Invalid(format!("window: {e}")))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_seconds)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle.timeout_seconds)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.cycle.deadline_seconds)
    }

    /// Ordered list of tracked stores: `[[stores]]` entries first, then the list file
    pub fn tracked_stores(&self) -> Result<Vec<TrackedStore>, ConfigError> {
        let mut stores = Vec::with_capacity(self.stores.len());
        for entry in &self.stores {
            let mut store = TrackedStore::from_url(&entry.url)?;
            if let Some(id) = &entry.id {
                store.id = id.clone();
            }
            if let Some(name) = &entry.name {
                store.name = name.clone();
            }
            if let Some(platform) = entry.platform {
                store.platform = platform;
            }
            stores.push(store);
        }

        if let Some(file) = &self.stores_file {
            stores.extend(load_url_list(file)?);
        }

        let mut seen = HashSet::new();
        for store in &stores {
            validate_store_id(&store.id)
                .into_result(&format!("store {}", store.url))
                .map_err(ConfigError::Invalid)?;
            if !seen.insert(store.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate store id '{}'", store.id)));
            }
        }

        Ok(stores)
    }
}
