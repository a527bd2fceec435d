use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::{
    error::{ActionError, ActionResult},
    models::TargetItem,
};

/// Turns a folder into an archive and back.
pub trait CompressionService: Send + Sync {
    fn compress(&self, item: &TargetItem, destination_dir: &Path) -> ActionResult<PathBuf>;
    fn decompress(&self, item: &TargetItem, destination_dir: &Path) -> ActionResult<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

pub trait ProcessLauncher: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<()>;
}

/// Runs commands to completion; a non-zero exit becomes an error carrying the tool's stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessLauncher;

impl ProcessLauncher for SystemProcessLauncher {
    fn run(&self, spec: &CommandSpec) -> Result<()> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .with_context(|| format!("failed to launch {}", spec.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                bail!("{} exited with {}", spec.program, output.status);
            }
            bail!("{} exited with {}: {stderr}", spec.program, output.status);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveTool {
    /// `ditto`, preserving resource forks and extended attributes.
    Ditto,
    /// Info-ZIP `zip` / `unzip`.
    InfoZip,
}

impl ArchiveTool {
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            ArchiveTool::Ditto
        } else {
            ArchiveTool::InfoZip
        }
    }

    fn compress_command(self, source: &Path, archive: &Path) -> CommandSpec {
        match self {
            ArchiveTool::Ditto => CommandSpec::new("ditto")
                .arg("-c")
                .arg("-k")
                .arg("--sequesterRsrc")
                .arg("--keepParent")
                .arg(source)
                .arg(archive),
            ArchiveTool::InfoZip => {
                let parent = source
                    .parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .unwrap_or(Path::new("."));
                let name = source.file_name().unwrap_or(source.as_os_str());
                CommandSpec::new("zip")
                    .arg("-r")
                    .arg("-q")
                    .arg("-y")
                    .arg(archive)
                    .arg(name)
                    .current_dir(parent)
            }
        }
    }

    fn extract_command(self, archive: &Path, root: &Path) -> CommandSpec {
        match self {
            ArchiveTool::Ditto => CommandSpec::new("ditto")
                .arg("-x")
                .arg("-k")
                .arg(archive)
                .arg(root),
            ArchiveTool::InfoZip => CommandSpec::new("unzip")
                .arg("-q")
                .arg("-o")
                .arg(archive)
                .arg("-d")
                .arg(root),
        }
    }
}

pub struct ArchiveCompressionService<L = SystemProcessLauncher> {
    tool: ArchiveTool,
    launcher: L,
}

impl ArchiveCompressionService<SystemProcessLauncher> {
    pub fn new() -> Self {
        Self::with_launcher(ArchiveTool::platform_default(), SystemProcessLauncher)
    }
}

impl Default for ArchiveCompressionService<SystemProcessLauncher> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ProcessLauncher> ArchiveCompressionService<L> {
    pub fn with_launcher(tool: ArchiveTool, launcher: L) -> Self {
        Self { tool, launcher }
    }

    fn try_compress(&self, item: &TargetItem, destination_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(destination_dir)
            .with_context(|| format!("failed to create {}", destination_dir.display()))?;

        let archive = destination_dir.join(format!("{}.zip", item.file_name()));
        if archive.exists() {
            fs::remove_file(&archive)
                .with_context(|| format!("failed to replace {}", archive.display()))?;
        }

        let archive = absolute(&archive)?;
        self.launcher
            .run(&self.tool.compress_command(&item.path, &archive))?;
        Ok(archive)
    }

    fn try_decompress(&self, item: &TargetItem, destination_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(destination_dir)
            .with_context(|| format!("failed to create {}", destination_dir.display()))?;

        let root = unique_extraction_root(destination_dir, &archive_stem(&item.path));
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create {}", root.display()))?;

        if let Err(err) = self
            .launcher
            .run(&self.tool.extract_command(&item.path, &root))
        {
            if let Err(cleanup) = fs::remove_dir_all(&root) {
                warn!("Failed to clean up {}: {cleanup}", root.display());
            }
            return Err(err);
        }

        let mut visible = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_name().to_string_lossy().starts_with('.') {
                visible.push(entry.path());
            }
        }

        if visible.len() == 1 {
            return Ok(visible.remove(0));
        }
        Ok(root)
    }
}

impl<L: ProcessLauncher> CompressionService for ArchiveCompressionService<L> {
    fn compress(&self, item: &TargetItem, destination_dir: &Path) -> ActionResult<PathBuf> {
        if !item.path.exists() {
            return Err(ActionError::ItemUnavailable {
                path: item.path.clone(),
            });
        }

        let archive = self
            .try_compress(item, destination_dir)
            .map_err(|err| ActionError::CompressionFailed {
                reason: format!("{err:#}"),
            })?;
        info!("Compressed {} into {}", item.path.display(), archive.display());
        Ok(archive)
    }

    fn decompress(&self, item: &TargetItem, destination_dir: &Path) -> ActionResult<PathBuf> {
        if !item.path.exists() {
            return Err(ActionError::ItemUnavailable {
                path: item.path.clone(),
            });
        }

        let extracted = self
            .try_decompress(item, destination_dir)
            .map_err(|err| ActionError::DecompressionFailed {
                reason: format!("{err:#}"),
            })?;
        info!(
            "Decompressed {} into {}",
            item.path.display(),
            extracted.display()
        );
        Ok(extracted)
    }
}

fn archive_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string())
}

/// `<stem>`, then `<stem>_unpacked`, `<stem>_unpacked2`, ... whichever is free first.
fn unique_extraction_root(dir: &Path, stem: &str) -> PathBuf {
    let first = dir.join(stem);
    if !first.exists() {
        return first;
    }

    let mut suffix = 1;
    loop {
        let name = if suffix == 1 {
            format!("{stem}_unpacked")
        } else {
            format!("{stem}_unpacked{suffix}")
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        suffix += 1;
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}
