use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ActionKind, TargetItem};

/// Append-only record of successful actions. Failures are the caller's to log; they never undo
/// the action that was being recorded.
pub trait AuditLogging: Send + Sync {
    fn record(&self, action: ActionKind, item: &TargetItem, destination: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: ActionKind,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
}

/// JSON-lines log at `<log_dir>/actions.log`.
pub struct FileAuditLogger {
    log_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileAuditLogger {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_path: log_dir.join("actions.log"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Every readable entry in write order; malformed lines are skipped.
    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.log_path)
            .with_context(|| format!("failed to read {}", self.log_path.display()))?;
        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

impl AuditLogging for FileAuditLogger {
    fn record(&self, action: ActionKind, item: &TargetItem, destination: &Path) -> Result<()> {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            action,
            source_path: item.path.clone(),
            destination_path: destination.to_path_buf(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(dir) = self.log_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("unable to open {} for writing", self.log_path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| "failed to append audit entry")?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditLogger;

impl AuditLogging for NoopAuditLogger {
    fn record(&self, _action: ActionKind, _item: &TargetItem, _destination: &Path) -> Result<()> {
        Ok(())
    }
}
