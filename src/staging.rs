use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ActionKind, TargetItem};

const ORIGINALS_DIR: &str = "originals";
const CATEGORY_DIRS: [&str; 4] = ["compress", "decompress", "noop", ORIGINALS_DIR];

/// Self-describing record written beside a staging location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingManifest {
    pub action: ActionKind,
    pub original_path: PathBuf,
    pub staged_copy: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Store that keeps originals aside so an action can be reversed.
pub trait UndoStaging: Send + Sync {
    /// Fresh per-action location `<root>/<action>/<timestamp>/<name>`; its parent is created.
    fn staging_location(&self, item: &TargetItem, action: ActionKind) -> Result<PathBuf>;

    /// Copy `path` into the originals directory under a unique name and return the copy.
    fn stage_original(&self, path: &Path) -> Result<PathBuf>;

    fn record_manifest(&self, location: &Path, manifest: &StagingManifest) -> Result<PathBuf>;

    /// Replace whatever sits at `destination` with a copy of `staged`.
    fn restore(&self, staged: &Path, destination: &Path) -> Result<()>;

    /// Remove staged entries last modified before `now - retention`. Returns how many went.
    fn prune_older_than(&self, retention: Duration) -> Result<usize>;
}

type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct FileUndoStagingManager {
    root: PathBuf,
    now: NowFn,
}

impl FileUndoStagingManager {
    pub fn new(root: PathBuf) -> Self {
        Self::with_clock(root, Arc::new(Utc::now))
    }

    pub fn with_clock(root: PathBuf, now: NowFn) -> Self {
        Self { root, now }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cutoff(&self, retention: Duration) -> SystemTime {
        let now: SystemTime = (self.now)().into();
        now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

impl UndoStaging for FileUndoStagingManager {
    fn staging_location(&self, item: &TargetItem, action: ActionKind) -> Result<PathBuf> {
        let timestamp = (self.now)().to_rfc3339_opts(SecondsFormat::Millis, true);
        let action_dir = self.root.join(action.as_str()).join(timestamp);
        fs::create_dir_all(&action_dir)
            .with_context(|| format!("failed to create {}", action_dir.display()))?;

        Ok(action_dir.join(item.file_name()))
    }

    fn stage_original(&self, path: &Path) -> Result<PathBuf> {
        let originals = self.root.join(ORIGINALS_DIR);
        fs::create_dir_all(&originals)
            .with_context(|| format!("failed to create {}", originals.display()))?;

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "item".to_string());
        let destination = originals.join(format!("{}-{}", Uuid::new_v4(), name));

        remove_if_exists(&destination)?;
        copy_recursively(path, &destination).with_context(|| {
            format!(
                "failed to stage {} into {}",
                path.display(),
                destination.display()
            )
        })?;

        debug!("Staged {} at {}", path.display(), destination.display());
        Ok(destination)
    }

    fn record_manifest(&self, location: &Path, manifest: &StagingManifest) -> Result<PathBuf> {
        let mut file_name = location
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        file_name.push(".json");
        let manifest_path = location.with_file_name(file_name);

        let serialized = serde_json::to_string_pretty(manifest)?;
        fs::write(&manifest_path, serialized)
            .with_context(|| format!("failed to write manifest {}", manifest_path.display()))?;
        Ok(manifest_path)
    }

    fn restore(&self, staged: &Path, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        remove_if_exists(destination)?;
        copy_recursively(staged, destination).with_context(|| {
            format!(
                "failed to restore {} to {}",
                staged.display(),
                destination.display()
            )
        })?;

        info!("Restored {} from staging", destination.display());
        Ok(())
    }

    fn prune_older_than(&self, retention: Duration) -> Result<usize> {
        let cutoff = self.cutoff(retention);
        let mut removed = 0;

        for category in CATEGORY_DIRS {
            let dir = self.root.join(category);
            if !dir.is_dir() {
                continue;
            }

            for entry in fs::read_dir(&dir)
                .with_context(|| format!("failed to list {}", dir.display()))?
            {
                let entry = entry?;
                let path = entry.path();
                let modified = match entry.metadata().and_then(|meta| meta.modified()) {
                    Ok(modified) => modified,
                    Err(err) => {
                        warn!("Skipping {} during prune: {err}", path.display());
                        continue;
                    }
                };
                if modified >= cutoff {
                    continue;
                }
                remove_if_exists(&path)?;
                removed += 1;
            }

            if fs::read_dir(&dir)?.next().is_none() {
                fs::remove_dir(&dir)
                    .with_context(|| format!("failed to remove {}", dir.display()))?;
            }
        }

        if removed > 0 {
            info!("Pruned {removed} expired staging entries");
        }
        Ok(removed)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
    .with_context(|| format!("failed to remove {}", path.display()))
}

fn copy_recursively(source: &Path, destination: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(source)
        .with_context(|| format!("{} is not accessible", source.display()))?;

    if meta.file_type().is_symlink() {
        let target = fs::read_link(source)?;
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, destination)?;
        #[cfg(not(unix))]
        fs::copy(source.parent().unwrap_or(Path::new(".")).join(&target), destination)
            .map(|_| ())?;
        return Ok(());
    }

    if meta.is_dir() {
        fs::create_dir_all(destination)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_recursively(&entry.path(), &destination.join(entry.file_name()))?;
        }
        return Ok(());
    }

    fs::copy(source, destination)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn manager(root: &Path) -> FileUndoStagingManager {
        FileUndoStagingManager::new(root.to_path_buf())
    }

    #[test]
    fn staging_location_lives_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("staging");
        let manager = manager(&root);
        let item = TargetItem::new(dir.path().join("Example"), true, false);

        let location = manager
            .staging_location(&item, ActionKind::Compress)
            .unwrap();

        assert!(location.starts_with(root.join("compress")));
        assert_eq!(location.file_name().unwrap(), "Example");
        assert!(location.parent().unwrap().is_dir());
    }

    #[test]
    fn stage_original_copies_directories() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Folder");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::write(source.join("nested").join("a.txt"), "hello").unwrap();

        let staged = manager(&dir.path().join("staging"))
            .stage_original(&source)
            .unwrap();

        assert!(staged.starts_with(dir.path().join("staging").join("originals")));
        assert!(staged
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("-Folder"));
        assert_eq!(
            fs::read_to_string(staged.join("nested").join("a.txt")).unwrap(),
            "hello"
        );
        assert!(source.exists());
    }

    #[test]
    fn restore_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir.path().join("staging"));
        let staged = dir.path().join("staged.txt");
        let destination = dir.path().join("out").join("destination.txt");
        fs::write(&staged, "undo").unwrap();
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        fs::write(&destination, "changed").unwrap();

        manager.restore(&staged, &destination).unwrap();

        assert_eq!(fs::read_to_string(&destination).unwrap(), "undo");
    }

    #[test]
    fn manifest_sits_beside_the_location() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir.path().join("staging"));
        let item = TargetItem::new(dir.path().join("Example"), true, false);
        let location = manager
            .staging_location(&item, ActionKind::Compress)
            .unwrap();
        let manifest = StagingManifest {
            action: ActionKind::Compress,
            original_path: item.path.clone(),
            staged_copy: dir.path().join("copy"),
            created_at: Utc::now(),
        };

        let path = manager.record_manifest(&location, &manifest).unwrap();

        assert_eq!(path.file_name().unwrap(), "Example.json");
        let parsed: StagingManifest =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn prune_removes_expired_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("staging");
        let retention = Duration::from_secs(60);
        let source = dir.path().join("source.txt");
        fs::write(&source, "x").unwrap();

        let fresh = manager(&root);
        let item = TargetItem::new(source.clone(), false, false);
        fresh.staging_location(&item, ActionKind::Compress).unwrap();
        fresh.stage_original(&source).unwrap();
        assert_eq!(fresh.prune_older_than(retention).unwrap(), 0);

        let later = Utc::now() + chrono::Duration::seconds(120);
        let aged = FileUndoStagingManager::with_clock(root.clone(), Arc::new(move || later));
        let removed = aged.prune_older_than(retention).unwrap();

        assert_eq!(removed, 2);
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    }
}
