use std::path::PathBuf;

/// Failures surfaced by resolution, perform and undo.
///
/// Each variant is attributable on its own; none of them leaves the pump or the orchestrator
/// unusable. Audit-log write failures never appear here: they are logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// The item resolver was refused access (accessibility permission missing).
    #[error("permission denied while resolving the item under the cursor")]
    PermissionDenied,

    /// The target disappeared between resolution and execution.
    #[error("item is no longer available: {}", path.display())]
    ItemUnavailable { path: PathBuf },

    #[error("compression failed: {reason}")]
    CompressionFailed { reason: String },

    #[error("decompression failed: {reason}")]
    DecompressionFailed { reason: String },

    /// `perform` was called before the target was confirmed.
    #[error("action requires confirmation before it can run")]
    ConfirmationPending,

    /// Undo was requested but no staged original exists for the item.
    #[error("no staged original is available to undo")]
    UndoUnavailable,

    /// The decision carries `ActionKind::None`; there is nothing to perform.
    #[error("no action applies to {}", path.display())]
    NoActionAvailable { path: PathBuf },

    /// Copying an original aside, or restoring it, failed.
    #[error("undo staging failed: {reason}")]
    StagingFailed { reason: String },

    #[error("item resolution failed: {reason}")]
    ResolutionFailed { reason: String },
}

pub type ActionResult<T> = Result<T, ActionError>;

impl ActionError {
    pub(crate) fn staging(err: anyhow::Error) -> Self {
        ActionError::StagingFailed {
            reason: format!("{err:#}"),
        }
    }
}
