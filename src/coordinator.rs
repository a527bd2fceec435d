use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use anyhow::{bail, Context, Result};
use tokio::{
    sync::{mpsc, watch},
    task::{self, JoinHandle},
};
use tokio_util::sync::CancellationToken;

use crate::{
    dedup::{resolve_key, DedupCache},
    dwell::{Clock, DwellConfig, DwellSnapshot, EventPump, PumpHandle},
    error::{ActionError, ActionResult},
    models::{ActionKind, CompletedAction, Decision, ModifierMask, Point, TargetItem},
    orchestrator::ActionOrchestrator,
    settings::ZipMode,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Finds the file-system item at a hit-test location.
///
/// Implementations may block (accessibility queries, scripting bridges); the coordinator
/// always calls them from the blocking pool.
pub trait ItemResolver: Send + Sync {
    fn resolve(&self, location: Point) -> ActionResult<Option<TargetItem>>;
}

/// What the UI layer is told about.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    ModifierHeld(bool),
    ConfirmationRequested(Decision),
    ActionCompleted(CompletedAction),
    ActionFailed {
        item: TargetItem,
        action: ActionKind,
        error: ActionError,
    },
    NothingToDo(TargetItem),
    PermissionRequired,
    UndoCompleted(CompletedAction),
}

struct Shared {
    resolver: Arc<dyn ItemResolver>,
    orchestrator: Arc<ActionOrchestrator>,
    dedup: Arc<DedupCache>,
    required: ModifierMask,
    zip_mode: ZipMode,
    events_tx: mpsc::UnboundedSender<CoordinatorEvent>,
    warned_permission: AtomicBool,
}

/// Drives the pipeline from dwell to action: pump, resolver, dedup gate, decision, perform.
pub struct HoverCoordinator {
    pump: EventPump,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl HoverCoordinator {
    pub fn new(
        config: DwellConfig,
        clock: Arc<dyn Clock>,
        resolver: Arc<dyn ItemResolver>,
        orchestrator: Arc<ActionOrchestrator>,
        dedup: Arc<DedupCache>,
        zip_mode: ZipMode,
    ) -> (Self, mpsc::UnboundedReceiver<CoordinatorEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            resolver,
            orchestrator,
            dedup,
            required: config.required,
            zip_mode,
            events_tx,
            warned_permission: AtomicBool::new(false),
        });

        let coordinator = Self {
            pump: EventPump::new(config, clock),
            shared,
            handle: None,
            cancel_token: None,
        };
        (coordinator, events_rx)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Submission side for the OS event tap, while running.
    pub fn pump_handle(&self) -> Option<PumpHandle> {
        self.pump.handle()
    }

    pub fn orchestrator(&self) -> &Arc<ActionOrchestrator> {
        &self.shared.orchestrator
    }

    pub fn start(&mut self) -> Result<PumpHandle> {
        if self.handle.is_some() {
            bail!("hover monitoring already active");
        }

        let (input, dwell_rx) = self.pump.start()?;
        let held_rx = self.pump.subscribe_held();
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(dispatch_loop(
            Arc::clone(&self.shared),
            dwell_rx,
            held_rx,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        log_info!("hover monitoring started");
        Ok(input)
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        let pump_result = self.pump.stop().await;
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("hover dispatch task failed to join")?;
        }
        pump_result?;
        log_info!("hover monitoring stopped");
        Ok(())
    }

    /// Resolve at `location` right away, skipping the duplicate check.
    pub async fn manual_resolve(&self, location: Point) {
        Arc::clone(&self.shared)
            .handle_location(location, true, true)
            .await;
    }

    /// The user accepted a `ConfirmationRequested` decision.
    pub async fn confirm(&self, decision: Decision) -> ActionResult<PathBuf> {
        let shared = Arc::clone(&self.shared);
        let item = decision.item.clone();
        let action = decision.intended_action;
        let orchestrator = Arc::clone(&shared.orchestrator);

        let result = task::spawn_blocking(move || {
            orchestrator.acknowledge_confirmation(&decision.item);
            orchestrator.perform_detailed(&decision)
        })
        .await
        .unwrap_or_else(|err| {
            Err(ActionError::StagingFailed {
                reason: format!("action task failed: {err}"),
            })
        });
        shared.report_perform(item, action, &result);
        result.map(|completed| completed.destination)
    }

    pub async fn undo_last(&self, item: TargetItem) -> ActionResult<CompletedAction> {
        let shared = Arc::clone(&self.shared);
        let orchestrator = Arc::clone(&shared.orchestrator);
        let target = item.clone();

        let result = task::spawn_blocking(move || orchestrator.undo_last_action(&target))
            .await
            .unwrap_or_else(|err| {
                Err(ActionError::StagingFailed {
                    reason: format!("undo task failed: {err}"),
                })
            });

        match &result {
            Ok(completed) => shared.emit(CoordinatorEvent::UndoCompleted(completed.clone())),
            Err(error) => shared.emit(CoordinatorEvent::ActionFailed {
                item,
                action: ActionKind::None,
                error: error.clone(),
            }),
        }
        result
    }
}

async fn dispatch_loop(
    shared: Arc<Shared>,
    mut dwell_rx: mpsc::Receiver<DwellSnapshot>,
    mut held_rx: watch::Receiver<bool>,
    cancel_token: CancellationToken,
) {
    let mut watching_held = true;
    let mut last_held = *held_rx.borrow_and_update();

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            changed = held_rx.changed(), if watching_held => {
                if changed.is_err() {
                    watching_held = false;
                    continue;
                }
                // A release and re-press between two polls shows up as an unchanged value.
                let held = *held_rx.borrow_and_update();
                if held != last_held {
                    last_held = held;
                    shared.emit(CoordinatorEvent::ModifierHeld(held));
                }
            }
            snapshot = dwell_rx.recv() => {
                let Some(snapshot) = snapshot else {
                    break;
                };
                let chord_held = snapshot.modifiers.filtered().contains_all(shared.required);
                Arc::clone(&shared)
                    .handle_location(snapshot.hit_test_location, chord_held, false)
                    .await;
            }
        }
    }

    log_debug!("hover dispatch loop exiting");
}

impl Shared {
    fn emit(&self, event: CoordinatorEvent) {
        if self.events_tx.send(event).is_err() {
            log_debug!("no listener for coordinator events");
        }
    }

    async fn handle_location(self: Arc<Self>, location: Point, chord_held: bool, bypass: bool) {
        let resolver = Arc::clone(&self.resolver);
        let resolved = task::spawn_blocking(move || resolver.resolve(location))
            .await
            .unwrap_or_else(|err| {
                Err(ActionError::ResolutionFailed {
                    reason: format!("resolver task failed: {err}"),
                })
            });

        let item = match resolved {
            Ok(Some(item)) => item,
            Ok(None) => return,
            Err(ActionError::PermissionDenied) => {
                if !self.warned_permission.swap(true, Ordering::SeqCst) {
                    log_warn!("accessibility permission required to resolve items");
                    self.emit(CoordinatorEvent::PermissionRequired);
                }
                return;
            }
            Err(err) => {
                log_error!("failed to resolve item: {err}");
                return;
            }
        };
        self.warned_permission.store(false, Ordering::SeqCst);

        let key = resolve_key(&item.path);
        let now = Instant::now();
        if !bypass && self.dedup.is_duplicate(&key, now) {
            log_debug!("skipping duplicate resolve for {}", item.path.display());
            return;
        }
        self.dedup.record(&key, now);

        let Some(decision) = self
            .orchestrator
            .evaluate_pending_action(chord_held, Some(item))
        else {
            return;
        };

        let prompt_for_archive =
            decision.intended_action == ActionKind::Decompress && self.zip_mode == ZipMode::Prompt;
        if decision.intended_action == ActionKind::None || prompt_for_archive {
            self.emit(CoordinatorEvent::NothingToDo(decision.item));
            return;
        }
        if decision.requires_confirmation {
            self.emit(CoordinatorEvent::ConfirmationRequested(decision));
            return;
        }

        let item = decision.item.clone();
        let action = decision.intended_action;
        let orchestrator = Arc::clone(&self.orchestrator);
        let result = task::spawn_blocking(move || orchestrator.perform_detailed(&decision))
            .await
            .unwrap_or_else(|err| {
                Err(ActionError::StagingFailed {
                    reason: format!("action task failed: {err}"),
                })
            });
        self.report_perform(item, action, &result);
    }

    fn report_perform(
        &self,
        item: TargetItem,
        action: ActionKind,
        result: &ActionResult<CompletedAction>,
    ) {
        match result {
            Ok(completed) => self.emit(CoordinatorEvent::ActionCompleted(completed.clone())),
            Err(error) => self.emit(CoordinatorEvent::ActionFailed {
                item,
                action,
                error: error.clone(),
            }),
        }
    }
}
