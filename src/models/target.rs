use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// The file-system item found under the cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetItem {
    pub path: PathBuf,
    pub is_container: bool,
    pub is_archive: bool,
}

impl TargetItem {
    pub fn new(path: impl Into<PathBuf>, is_container: bool, is_archive: bool) -> Self {
        Self {
            path: path.into(),
            is_container,
            is_archive,
        }
    }

    /// Describe an on-disk item: directories are containers, regular `.zip` files archives.
    pub fn from_path(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)?;
        let is_container = metadata.is_dir();
        let is_archive = metadata.is_file() && has_zip_extension(&path);
        Ok(Self {
            path,
            is_container,
            is_archive,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    /// Directory the action writes its result into.
    pub fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

fn has_zip_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Compress,
    Decompress,
    None,
}

impl ActionKind {
    pub fn for_item(item: &TargetItem) -> Self {
        if item.is_container {
            ActionKind::Compress
        } else if item.is_archive {
            ActionKind::Decompress
        } else {
            ActionKind::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Compress => "compress",
            ActionKind::Decompress => "decompress",
            ActionKind::None => "noop",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub item: TargetItem,
    pub intended_action: ActionKind,
    pub requires_confirmation: bool,
}

/// The most recent successful action; the only thing undo can reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedAction {
    pub item: TargetItem,
    pub action: ActionKind,
    pub destination: PathBuf,
    pub staged_original: PathBuf,
}
