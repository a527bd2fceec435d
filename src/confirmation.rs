use std::{
    collections::HashSet,
    path::{Component, Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use anyhow::Result;
use chrono::Utc;
use log::info;

use crate::db::Database;

/// Durable "has this exact target been confirmed" memory.
pub trait ConfirmationTracking: Send + Sync {
    fn needs_confirmation(&self, path: &Path) -> bool;
    fn mark_confirmed(&self, path: &Path) -> Result<()>;
    fn reset_confirmation(&self, path: &Path) -> Result<()>;
}

/// Lexically normalized identity used as the confirmation key.
///
/// `.` components are dropped and `..` pops the previous normal component, so
/// `/a/./b/../c` and `/a/c` name the same target. Symlinks are not followed.
pub fn identity_key(path: &Path) -> String {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized.to_string_lossy().into_owned()
}

#[derive(Debug, Default)]
pub struct InMemoryConfirmationTracker {
    confirmed: Mutex<HashSet<String>>,
}

impl InMemoryConfirmationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.confirmed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfirmationTracking for InMemoryConfirmationTracker {
    fn needs_confirmation(&self, path: &Path) -> bool {
        !self.lock().contains(&identity_key(path))
    }

    fn mark_confirmed(&self, path: &Path) -> Result<()> {
        self.lock().insert(identity_key(path));
        Ok(())
    }

    fn reset_confirmation(&self, path: &Path) -> Result<()> {
        self.lock().remove(&identity_key(path));
        Ok(())
    }
}

/// Confirmation set backed by the `confirmed_targets` table.
///
/// The table is loaded once at construction; reads are served from the cached set and every
/// mutation is written through while the cache lock is held, so the cache and the table
/// never disagree for longer than one call.
pub struct SqliteConfirmationTracker {
    db: Database,
    cache: Mutex<HashSet<String>>,
}

impl SqliteConfirmationTracker {
    pub fn new(db: Database) -> Result<Self> {
        let cache: HashSet<String> = db
            .list_confirmations()?
            .into_iter()
            .map(|record| record.identity)
            .collect();
        info!("Loaded {} confirmed targets", cache.len());

        Ok(Self {
            db,
            cache: Mutex::new(cache),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfirmationTracking for SqliteConfirmationTracker {
    fn needs_confirmation(&self, path: &Path) -> bool {
        !self.lock().contains(&identity_key(path))
    }

    fn mark_confirmed(&self, path: &Path) -> Result<()> {
        let identity = identity_key(path);
        let mut cache = self.lock();
        if cache.contains(&identity) {
            return Ok(());
        }
        self.db.upsert_confirmation(&identity, Utc::now())?;
        cache.insert(identity);
        Ok(())
    }

    fn reset_confirmation(&self, path: &Path) -> Result<()> {
        let identity = identity_key(path);
        let mut cache = self.lock();
        self.db.delete_confirmation(&identity)?;
        cache.remove(&identity);
        Ok(())
    }
}
