use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use crate::{dwell::DwellConfig, models::HeldKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TriggerSettings {
    pub held_key: HeldKey,
    pub dwell_threshold_ms: u64,
    pub debounce_interval_ms: u64,
    pub movement_tolerance: f64,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            held_key: HeldKey::Option,
            dwell_threshold_ms: 200,
            debounce_interval_ms: 80,
            movement_tolerance: 4.0,
        }
    }
}

impl TriggerSettings {
    pub fn dwell_config(&self) -> DwellConfig {
        DwellConfig {
            dwell_threshold: Duration::from_millis(self.dwell_threshold_ms),
            debounce_interval: Duration::from_millis(self.debounce_interval_ms),
            required: self.held_key.mask(),
            movement_tolerance: self.movement_tolerance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DedupSettings {
    pub ttl_ms: u64,
    pub capacity: usize,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            ttl_ms: 3_000,
            capacity: 256,
        }
    }
}

impl DedupSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UndoSettings {
    pub retention_secs: u64,
}

impl Default for UndoSettings {
    fn default() -> Self {
        Self {
            retention_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl UndoSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// What a dwell over a `.zip` does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZipMode {
    /// Offer extraction like any other action.
    #[default]
    Auto,
    /// Leave archives alone; they are reported as having nothing to do.
    Prompt,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ZipSettings {
    pub mode: ZipMode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub trigger: TriggerSettings,
    pub dedup: DedupSettings,
    pub undo: UndoSettings,
    pub zip: ZipSettings,
}

/// Where everything lives under one application-data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join("dwellzip.sqlite3")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AppSettings>,
}

impl SettingsStore {
    /// Load settings from `path`; a missing or unreadable document yields the defaults.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("Ignoring malformed settings at {}: {err}", path.display());
                AppSettings::default()
            })
        } else {
            AppSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> AppSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: AppSettings) -> Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: AppSettings = serde_json::from_str(&contents)?;
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        *guard = data;
        Ok(())
    }

    fn persist(&self, data: &AppSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
