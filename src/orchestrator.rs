use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::Utc;
use log::{error, info, warn};

use crate::{
    audit::AuditLogging,
    compression::CompressionService,
    confirmation::{identity_key, ConfirmationTracking},
    dedup::{resolve_key, DedupCache},
    error::{ActionError, ActionResult},
    models::{ActionKind, CompletedAction, Decision, TargetItem},
    staging::{StagingManifest, UndoStaging},
};

/// Decides what a resolved item warrants, gates it behind confirmation, stages the original,
/// runs the action and can reverse the latest one.
pub struct ActionOrchestrator {
    compression: Arc<dyn CompressionService>,
    audit: Arc<dyn AuditLogging>,
    staging: Arc<dyn UndoStaging>,
    confirmations: Arc<dyn ConfirmationTracking>,
    dedup: Arc<DedupCache>,
    undo_retention: Duration,
    acknowledged: Mutex<HashSet<String>>,
    last_completed: Mutex<Option<CompletedAction>>,
}

impl ActionOrchestrator {
    pub fn new(
        compression: Arc<dyn CompressionService>,
        audit: Arc<dyn AuditLogging>,
        staging: Arc<dyn UndoStaging>,
        confirmations: Arc<dyn ConfirmationTracking>,
        dedup: Arc<DedupCache>,
        undo_retention: Duration,
    ) -> Self {
        Self {
            compression,
            audit,
            staging,
            confirmations,
            dedup,
            undo_retention,
            acknowledged: Mutex::new(HashSet::new()),
            last_completed: Mutex::new(None),
        }
    }

    pub fn evaluate_pending_action(
        &self,
        chord_held: bool,
        item: Option<TargetItem>,
    ) -> Option<Decision> {
        if !chord_held {
            return None;
        }
        let item = item?;

        let intended_action = ActionKind::for_item(&item);
        let requires_confirmation =
            intended_action != ActionKind::None && self.awaiting_confirmation(&item);

        Some(Decision {
            item,
            intended_action,
            requires_confirmation,
        })
    }

    /// Record the user's go-ahead for `item`. Persisted confirmation only happens once an
    /// action on it succeeds.
    pub fn acknowledge_confirmation(&self, item: &TargetItem) {
        self.acknowledged_lock().insert(identity_key(&item.path));
    }

    pub fn confirm_and_perform(&self, decision: &Decision) -> ActionResult<PathBuf> {
        self.acknowledge_confirmation(&decision.item);
        self.perform(decision)
    }

    /// Run the decided action. Any failure releases the item's dedup key so it can be retried.
    pub fn perform(&self, decision: &Decision) -> ActionResult<PathBuf> {
        self.perform_detailed(decision)
            .map(|completed| completed.destination)
    }

    /// Like [`perform`](Self::perform), returning this run's own record rather than whatever
    /// `last_completed` holds once a concurrent perform has finished.
    pub fn perform_detailed(&self, decision: &Decision) -> ActionResult<CompletedAction> {
        let item = &decision.item;
        if decision.intended_action == ActionKind::None {
            return Err(ActionError::NoActionAvailable {
                path: item.path.clone(),
            });
        }
        if self.awaiting_confirmation(item) {
            return Err(ActionError::ConfirmationPending);
        }

        match self.execute(item, decision.intended_action) {
            Ok(completed) => {
                self.finish(completed.clone());
                Ok(completed)
            }
            Err(err) => {
                self.dedup.remove(&resolve_key(&item.path));
                warn!(
                    "{} of {} failed: {err}",
                    decision.intended_action,
                    item.path.display()
                );
                Err(err)
            }
        }
    }

    /// Put the staged original of the latest action on `item` back in place.
    pub fn undo_last_action(&self, item: &TargetItem) -> ActionResult<CompletedAction> {
        let completed = match self.last_completed() {
            Some(completed) if completed.item.path == item.path => completed,
            _ => return Err(ActionError::UndoUnavailable),
        };
        if !completed.staged_original.exists() {
            return Err(ActionError::UndoUnavailable);
        }

        // Restore outside the record lock.
        self.staging
            .restore(&completed.staged_original, &completed.item.path)
            .map_err(ActionError::staging)?;
        {
            let mut last = self.last_completed_lock();
            if last.as_ref() == Some(&completed) {
                *last = None;
            }
        }

        self.acknowledged_lock().remove(&identity_key(&item.path));
        if let Err(err) = self.confirmations.reset_confirmation(&item.path) {
            error!(
                "Failed to reset confirmation for {}: {err:#}",
                item.path.display()
            );
        }
        self.dedup.remove(&resolve_key(&item.path));

        info!("Undid {} of {}", completed.action, item.path.display());
        Ok(completed)
    }

    pub fn last_completed(&self) -> Option<CompletedAction> {
        self.last_completed_lock().clone()
    }

    fn awaiting_confirmation(&self, item: &TargetItem) -> bool {
        self.confirmations.needs_confirmation(&item.path)
            && !self
                .acknowledged_lock()
                .contains(&identity_key(&item.path))
    }

    fn execute(&self, item: &TargetItem, action: ActionKind) -> ActionResult<CompletedAction> {
        if std::fs::symlink_metadata(&item.path).is_err() {
            return Err(ActionError::ItemUnavailable {
                path: item.path.clone(),
            });
        }

        let location = self
            .staging
            .staging_location(item, action)
            .map_err(ActionError::staging)?;
        let staged_original = self
            .staging
            .stage_original(&item.path)
            .map_err(ActionError::staging)?;

        let manifest = StagingManifest {
            action,
            original_path: item.path.clone(),
            staged_copy: staged_original.clone(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.staging.record_manifest(&location, &manifest) {
            warn!("Failed to write staging manifest: {err:#}");
        }

        let destination_dir = item.parent_dir();
        let destination = match action {
            ActionKind::Compress => self.compression.compress(item, &destination_dir)?,
            ActionKind::Decompress => self.compression.decompress(item, &destination_dir)?,
            ActionKind::None => {
                return Err(ActionError::NoActionAvailable {
                    path: item.path.clone(),
                })
            }
        };

        Ok(CompletedAction {
            item: item.clone(),
            action,
            destination,
            staged_original,
        })
    }

    fn finish(&self, completed: CompletedAction) {
        let item = &completed.item;

        if let Err(err) = self.confirmations.mark_confirmed(&item.path) {
            error!(
                "Failed to persist confirmation for {}: {err:#}",
                item.path.display()
            );
        }
        self.acknowledged_lock().remove(&identity_key(&item.path));

        if let Err(err) = self
            .audit
            .record(completed.action, item, &completed.destination)
        {
            warn!("Failed to record audit entry: {err:#}");
        }

        info!(
            "{} {} -> {}",
            completed.action,
            item.path.display(),
            completed.destination.display()
        );
        *self.last_completed_lock() = Some(completed);

        if let Err(err) = self.staging.prune_older_than(self.undo_retention) {
            warn!("Staging retention sweep failed: {err:#}");
        }
    }

    fn acknowledged_lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.acknowledged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn last_completed_lock(&self) -> MutexGuard<'_, Option<CompletedAction>> {
        self.last_completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}


#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::Path,
        sync::{atomic::Ordering, OnceLock, Weak},
        time::Instant,
    };

    use super::test_support::Fixture;
    use super::*;
    use crate::{audit::NoopAuditLogger, staging::FileUndoStagingManager};
    use pretty_assertions::assert_eq;

    struct FailingAudit;

    impl AuditLogging for FailingAudit {
        fn record(
            &self,
            _action: ActionKind,
            _item: &TargetItem,
            _destination: &Path,
        ) -> anyhow::Result<()> {
            anyhow::bail!("log volume is read-only")
        }
    }

    /// Staging store that, while restoring, reads the orchestrator and runs one more action
    /// through it.
    struct InterleavingStaging {
        inner: Arc<FileUndoStagingManager>,
        orchestrator: OnceLock<Weak<ActionOrchestrator>>,
        during_restore: Mutex<Option<Decision>>,
        observed: Mutex<Option<Option<CompletedAction>>>,
    }

    impl UndoStaging for InterleavingStaging {
        fn staging_location(
            &self,
            item: &TargetItem,
            action: ActionKind,
        ) -> anyhow::Result<PathBuf> {
            self.inner.staging_location(item, action)
        }

        fn stage_original(&self, path: &Path) -> anyhow::Result<PathBuf> {
            self.inner.stage_original(path)
        }

        fn record_manifest(
            &self,
            location: &Path,
            manifest: &StagingManifest,
        ) -> anyhow::Result<PathBuf> {
            self.inner.record_manifest(location, manifest)
        }

        fn restore(&self, staged: &Path, destination: &Path) -> anyhow::Result<()> {
            let pending = self.during_restore.lock().unwrap().take();
            if let Some(decision) = pending {
                let orchestrator = self.orchestrator.get().unwrap().upgrade().unwrap();
                *self.observed.lock().unwrap() = Some(orchestrator.last_completed());
                orchestrator.perform(&decision).unwrap();
            }
            self.inner.restore(staged, destination)
        }

        fn prune_older_than(&self, retention: Duration) -> anyhow::Result<usize> {
            self.inner.prune_older_than(retention)
        }
    }

    #[test]
    fn idle_without_chord_or_item() {
        let fx = Fixture::new();
        let folder = fx.folder("Folder");

        assert_eq!(
            fx.orchestrator
                .evaluate_pending_action(false, Some(folder)),
            None
        );
        assert_eq!(fx.orchestrator.evaluate_pending_action(true, None), None);
    }

    #[test]
    fn decision_follows_item_kind() {
        let fx = Fixture::new();
        let archive_path = fx.workspace().join("Bundle.zip");
        fs::write(&archive_path, "zip").unwrap();
        let plain_path = fx.workspace().join("notes.txt");
        fs::write(&plain_path, "text").unwrap();

        let archive = fx
            .orchestrator
            .evaluate_pending_action(true, Some(TargetItem::from_path(archive_path).unwrap()))
            .unwrap();
        assert_eq!(archive.intended_action, ActionKind::Decompress);
        assert!(archive.requires_confirmation);

        let plain = fx
            .orchestrator
            .evaluate_pending_action(true, Some(TargetItem::from_path(plain_path).unwrap()))
            .unwrap();
        assert_eq!(plain.intended_action, ActionKind::None);
        assert!(!plain.requires_confirmation);
        assert_eq!(
            fx.orchestrator.perform(&plain),
            Err(ActionError::NoActionAvailable {
                path: plain.item.path.clone()
            })
        );
    }

    #[test]
    fn perform_before_confirmation_is_rejected() {
        let fx = Fixture::new();
        let decision = fx
            .orchestrator
            .evaluate_pending_action(true, Some(fx.folder("Folder")))
            .unwrap();
        assert_eq!(decision.intended_action, ActionKind::Compress);
        assert!(decision.requires_confirmation);

        assert_eq!(
            fx.orchestrator.perform(&decision),
            Err(ActionError::ConfirmationPending)
        );
        assert!(fx.compression.calls.lock().unwrap().is_empty());
        assert!(fx.audit.entries().unwrap().is_empty());
    }

    #[test]
    fn acknowledged_perform_completes_and_confirms() {
        let fx = Fixture::new();
        let folder = fx.folder("Folder");
        let decision = fx
            .orchestrator
            .evaluate_pending_action(true, Some(folder.clone()))
            .unwrap();

        fx.orchestrator.acknowledge_confirmation(&folder);
        let destination = fx.orchestrator.perform(&decision).unwrap();

        assert_eq!(destination, folder.parent_dir().join("Folder.zip"));
        assert!(!fx.confirmations.needs_confirmation(&folder.path));
        let completed = fx.orchestrator.last_completed().unwrap();
        assert_eq!(completed.destination, destination);
        assert!(completed.staged_original.join("notes.txt").exists());

        let entries = fx.audit.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, ActionKind::Compress);

        let again = fx
            .orchestrator
            .evaluate_pending_action(true, Some(folder))
            .unwrap();
        assert!(!again.requires_confirmation);
    }

    #[test]
    fn confirm_and_perform_matches_two_step_flow() {
        let fx = Fixture::new();
        let decision = fx
            .orchestrator
            .evaluate_pending_action(true, Some(fx.folder("Folder")))
            .unwrap();

        let destination = fx.orchestrator.confirm_and_perform(&decision).unwrap();
        assert!(destination.ends_with("Folder.zip"));
        assert_eq!(fx.audit.entries().unwrap().len(), 1);
    }

    #[test]
    fn failure_releases_dedup_key_and_confirms_nothing() {
        let fx = Fixture::new();
        let folder = fx.folder("Folder");
        let key = resolve_key(&folder.path);
        fx.dedup.record(&key, Instant::now());
        fx.compression.fail.store(true, Ordering::SeqCst);

        let decision = fx
            .orchestrator
            .evaluate_pending_action(true, Some(folder.clone()))
            .unwrap();
        let err = fx.orchestrator.confirm_and_perform(&decision).unwrap_err();

        assert!(matches!(err, ActionError::CompressionFailed { .. }));
        assert!(!fx.dedup.is_duplicate(&key, Instant::now()));
        assert!(fx.confirmations.needs_confirmation(&folder.path));
        assert!(fx.audit.entries().unwrap().is_empty());
        assert_eq!(fx.orchestrator.last_completed(), None);

        // Acknowledgement survives the failure, so a retry does not ask again.
        fx.compression.fail.store(false, Ordering::SeqCst);
        assert!(fx.orchestrator.perform(&decision).is_ok());
    }

    #[test]
    fn stale_decision_reports_unavailable_item() {
        let fx = Fixture::new();
        let folder = fx.folder("Folder");
        let key = resolve_key(&folder.path);
        let decision = fx
            .orchestrator
            .evaluate_pending_action(true, Some(folder.clone()))
            .unwrap();
        fs::remove_dir_all(&folder.path).unwrap();
        fx.dedup.record(&key, Instant::now());

        assert_eq!(
            fx.orchestrator.confirm_and_perform(&decision),
            Err(ActionError::ItemUnavailable {
                path: folder.path.clone()
            })
        );
        assert!(!fx.dedup.is_duplicate(&key, Instant::now()));
    }

    #[test]
    fn undo_restores_original_and_resets_confirmation() {
        let fx = Fixture::new();
        let folder = fx.folder("Folder");
        let decision = fx
            .orchestrator
            .evaluate_pending_action(true, Some(folder.clone()))
            .unwrap();
        fx.orchestrator.confirm_and_perform(&decision).unwrap();
        fs::write(folder.path.join("notes.txt"), "changed").unwrap();

        let undone = fx.orchestrator.undo_last_action(&folder).unwrap();

        assert_eq!(undone.action, ActionKind::Compress);
        assert_eq!(
            fs::read_to_string(folder.path.join("notes.txt")).unwrap(),
            "original"
        );
        assert!(fx.confirmations.needs_confirmation(&folder.path));
        assert_eq!(fx.orchestrator.last_completed(), None);
        assert_eq!(
            fx.orchestrator.undo_last_action(&folder),
            Err(ActionError::UndoUnavailable)
        );

        let fresh = fx
            .orchestrator
            .evaluate_pending_action(true, Some(folder))
            .unwrap();
        assert!(fresh.requires_confirmation);
    }

    #[test]
    fn undo_only_reverses_the_latest_item() {
        let fx = Fixture::new();
        let first = fx.folder("First");
        let second = fx.folder("Second");

        assert_eq!(
            fx.orchestrator.undo_last_action(&first),
            Err(ActionError::UndoUnavailable)
        );

        for item in [&first, &second] {
            let decision = fx
                .orchestrator
                .evaluate_pending_action(true, Some(item.clone()))
                .unwrap();
            fx.orchestrator.confirm_and_perform(&decision).unwrap();
        }

        assert_eq!(
            fx.orchestrator.undo_last_action(&first),
            Err(ActionError::UndoUnavailable)
        );
        assert!(fx.orchestrator.undo_last_action(&second).is_ok());
    }

    #[test]
    fn undo_without_staged_copy_is_unavailable() {
        let fx = Fixture::new();
        let folder = fx.folder("Folder");
        let decision = fx
            .orchestrator
            .evaluate_pending_action(true, Some(folder.clone()))
            .unwrap();
        fx.orchestrator.confirm_and_perform(&decision).unwrap();

        let staged = fx.orchestrator.last_completed().unwrap().staged_original;
        fs::remove_dir_all(staged).unwrap();

        assert_eq!(
            fx.orchestrator.undo_last_action(&folder),
            Err(ActionError::UndoUnavailable)
        );
    }

    #[test]
    fn audit_failure_does_not_undo_a_successful_action() {
        let fx = Fixture::new();
        let orchestrator = fx.orchestrator_with(Arc::new(FailingAudit), fx.staging.clone());
        let folder = fx.folder("Folder");
        let decision = orchestrator
            .evaluate_pending_action(true, Some(folder.clone()))
            .unwrap();

        orchestrator.acknowledge_confirmation(&folder);
        let destination = orchestrator.perform(&decision).unwrap();

        assert_eq!(destination, folder.parent_dir().join("Folder.zip"));
        assert!(!fx.confirmations.needs_confirmation(&folder.path));
        let completed = orchestrator.last_completed().unwrap();
        assert_eq!(completed.item, folder);
        assert_eq!(completed.destination, destination);
    }

    #[test]
    fn detailed_perform_reports_its_own_action() {
        let fx = Fixture::new();
        let first = fx.folder("First");
        let second = fx.folder("Second");
        let decisions: Vec<Decision> = [&first, &second]
            .into_iter()
            .map(|item| {
                fx.orchestrator.acknowledge_confirmation(item);
                fx.orchestrator
                    .evaluate_pending_action(true, Some(item.clone()))
                    .unwrap()
            })
            .collect();

        let first_done = fx.orchestrator.perform_detailed(&decisions[0]).unwrap();
        let second_done = fx.orchestrator.perform_detailed(&decisions[1]).unwrap();

        assert_eq!(first_done.item, first);
        assert_eq!(first_done.destination, first.parent_dir().join("First.zip"));
        assert_eq!(second_done.item, second);
        assert_eq!(fx.orchestrator.last_completed(), Some(second_done));
    }

    #[test]
    fn undo_releases_the_record_during_restore_and_keeps_newer_actions() {
        let fx = Fixture::new();
        let first = fx.folder("First");
        let second = fx.folder("Second");
        fx.confirmations.mark_confirmed(&second.path).unwrap();

        let staging = Arc::new(InterleavingStaging {
            inner: fx.staging.clone(),
            orchestrator: OnceLock::new(),
            during_restore: Mutex::new(None),
            observed: Mutex::new(None),
        });
        let orchestrator =
            Arc::new(fx.orchestrator_with(Arc::new(NoopAuditLogger), staging.clone()));
        staging
            .orchestrator
            .set(Arc::downgrade(&orchestrator))
            .unwrap();

        let first_decision = orchestrator
            .evaluate_pending_action(true, Some(first.clone()))
            .unwrap();
        orchestrator.confirm_and_perform(&first_decision).unwrap();
        let first_done = orchestrator.last_completed().unwrap();

        let second_decision = orchestrator
            .evaluate_pending_action(true, Some(second.clone()))
            .unwrap();
        assert!(!second_decision.requires_confirmation);
        *staging.during_restore.lock().unwrap() = Some(second_decision);

        let undone = orchestrator.undo_last_action(&first).unwrap();

        assert_eq!(undone, first_done);
        assert_eq!(
            staging.observed.lock().unwrap().clone(),
            Some(Some(first_done))
        );
        assert_eq!(orchestrator.last_completed().unwrap().item, second);
    }
}
