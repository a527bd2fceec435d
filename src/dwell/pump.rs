use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::models::{ModifierMask, Point, PointerSample};

use super::{
    clock::Clock,
    state::{DwellAction, DwellConfig, DwellSnapshot, DwellStateMachine},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const DWELL_CHANNEL_CAPACITY: usize = 16;

/// Raw input as delivered by the OS event tap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    MouseMoved(PointerSample),
    ModifiersChanged {
        modifiers: ModifierMask,
        timestamp: Duration,
    },
}

/// Thread-safe submission side of a running pump.
///
/// Cloneable and usable from any thread (including a non-tokio capture thread); events are
/// queued onto the pump's serial task and never touch dwell state directly.
#[derive(Clone)]
pub struct PumpHandle {
    input_tx: mpsc::UnboundedSender<InputEvent>,
    clock: Arc<dyn Clock>,
}

impl PumpHandle {
    /// Returns false once the pump has stopped.
    pub fn submit(&self, event: InputEvent) -> bool {
        self.input_tx.send(event).is_ok()
    }

    pub fn mouse_moved(
        &self,
        display_location: Point,
        hit_test_location: Point,
        modifiers: ModifierMask,
    ) -> bool {
        self.submit(InputEvent::MouseMoved(PointerSample::new(
            display_location,
            hit_test_location,
            modifiers,
            self.clock.now(),
        )))
    }

    pub fn modifiers_changed(&self, modifiers: ModifierMask) -> bool {
        self.submit(InputEvent::ModifiersChanged {
            modifiers,
            timestamp: self.clock.now(),
        })
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }
}

/// Owns the dwell state machine and its timer on one serial task.
pub struct EventPump {
    clock: Arc<dyn Clock>,
    machine: Option<DwellStateMachine>,
    held_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<DwellStateMachine>>,
    cancel_token: Option<CancellationToken>,
    input: Option<PumpHandle>,
}

impl EventPump {
    pub fn new(config: DwellConfig, clock: Arc<dyn Clock>) -> Self {
        let (held_tx, _) = watch::channel(false);
        Self {
            clock,
            machine: Some(DwellStateMachine::new(config)),
            held_tx,
            handle: None,
            cancel_token: None,
            input: None,
        }
    }

    /// Edge-triggered "chord held" flag, for indicators.
    pub fn subscribe_held(&self) -> watch::Receiver<bool> {
        self.held_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<PumpHandle> {
        self.input.clone()
    }

    /// Spawn the processing task.
    ///
    /// Every start hands out a fresh dwell receiver, so nothing scheduled before a `stop`
    /// can reach a consumer of a later run.
    pub fn start(&mut self) -> Result<(PumpHandle, mpsc::Receiver<DwellSnapshot>)> {
        if self.handle.is_some() {
            bail!("event pump already running");
        }
        let Some(machine) = self.machine.take() else {
            bail!("event pump state machine unavailable");
        };

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (dwell_tx, dwell_rx) = mpsc::channel(DWELL_CHANNEL_CAPACITY);
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(pump_loop(
            machine,
            Arc::clone(&self.clock),
            input_rx,
            dwell_tx,
            self.held_tx.clone(),
            cancel_token.clone(),
        ));

        let input = PumpHandle {
            input_tx,
            clock: Arc::clone(&self.clock),
        };

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.input = Some(input.clone());
        log_info!("event pump started");
        Ok((input, dwell_rx))
    }

    /// Cancel the pending dwell timer and wait for the processing task to exit.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.input = None;

        if let Some(handle) = self.handle.take() {
            let machine = handle
                .await
                .context("event pump task failed to join")?;
            self.machine = Some(machine);
        }
        notify_held(&self.held_tx, false);
        Ok(())
    }
}

async fn pump_loop(
    mut machine: DwellStateMachine,
    clock: Arc<dyn Clock>,
    mut input_rx: mpsc::UnboundedReceiver<InputEvent>,
    dwell_tx: mpsc::Sender<DwellSnapshot>,
    held_tx: watch::Sender<bool>,
    cancel_token: CancellationToken,
) -> DwellStateMachine {
    let mut deadline: Option<Instant> = None;

    loop {
        let pending = deadline;
        let timer = async move {
            match pending {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            event = input_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                let action = match event {
                    InputEvent::MouseMoved(sample) => machine.handle_mouse_move(&sample),
                    InputEvent::ModifiersChanged { modifiers, timestamp } => {
                        machine.handle_modifier_change(modifiers, timestamp)
                    }
                };
                notify_held(&held_tx, machine.is_held());

                match action {
                    DwellAction::StartDwell => {
                        deadline = Some(Instant::now() + machine.config().dwell_threshold);
                    }
                    DwellAction::CancelDwell => deadline = None,
                    DwellAction::None => {}
                }
            }
            _ = timer => {
                deadline = None;
                match machine.handle_dwell_timer(clock.now()) {
                    Some(snapshot) => deliver(&dwell_tx, snapshot),
                    None if machine.is_armed() => {
                        // Fired for a stale movement or inside the debounce window.
                        deadline = Some(Instant::now() + machine.config().dwell_threshold);
                    }
                    None => {}
                }
            }
        }
    }

    machine.disarm();
    log_info!("event pump shutting down");
    machine
}

fn deliver(dwell_tx: &mpsc::Sender<DwellSnapshot>, snapshot: DwellSnapshot) {
    match dwell_tx.try_send(snapshot) {
        Ok(()) => log_debug!(
            "dwell resolved at ({:.1}, {:.1})",
            snapshot.hit_test_location.x,
            snapshot.hit_test_location.y
        ),
        Err(mpsc::error::TrySendError::Full(_)) => {
            log_warn!("dwell consumer is behind; dropping dwell event")
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            log_debug!("dwell consumer gone; dropping dwell event")
        }
    }
}

fn notify_held(held_tx: &watch::Sender<bool>, held: bool) {
    held_tx.send_if_modified(|current| {
        if *current == held {
            false
        } else {
            *current = held;
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwell::MonotonicClock;
    use tokio::time::timeout;

    const OPTION: ModifierMask = ModifierMask::OPTION;

    fn pump() -> (EventPump, Arc<MonotonicClock>) {
        let clock = Arc::new(MonotonicClock::new());
        let pump = EventPump::new(DwellConfig::default(), clock.clone());
        (pump, clock)
    }

    fn at(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[tokio::test(start_paused = true)]
    async fn stationary_hold_fires_once_after_threshold() {
        let (mut pump, clock) = pump();
        let (input, mut dwell_rx) = pump.start().unwrap();

        let started = clock.now();
        assert!(input.mouse_moved(at(40.0, 40.0), at(40.0, 60.0), OPTION));

        let snapshot = timeout(Duration::from_secs(1), dwell_rx.recv())
            .await
            .expect("dwell should fire")
            .expect("channel open");
        assert!(clock.now() - started >= Duration::from_millis(200));
        assert_eq!(snapshot.display_location, at(40.0, 40.0));
        assert_eq!(snapshot.hit_test_location, at(40.0, 60.0));

        assert!(timeout(Duration::from_secs(2), dwell_rx.recv()).await.is_err());
        pump.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn movement_restarts_the_timer() {
        let (mut pump, clock) = pump();
        let (input, mut dwell_rx) = pump.start().unwrap();

        input.mouse_moved(at(0.0, 0.0), at(0.0, 0.0), OPTION);
        time::sleep(Duration::from_millis(120)).await;
        let moved_at = clock.now();
        input.mouse_moved(at(50.0, 0.0), at(50.0, 0.0), OPTION);

        let snapshot = timeout(Duration::from_secs(1), dwell_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(clock.now() - moved_at >= Duration::from_millis(200));
        assert_eq!(snapshot.display_location, at(50.0, 0.0));
        pump.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_within_tolerance_reschedules_instead_of_dropping() {
        let (mut pump, clock) = pump();
        let (input, mut dwell_rx) = pump.start().unwrap();

        input.mouse_moved(at(0.0, 0.0), at(0.0, 0.0), OPTION);
        time::sleep(Duration::from_millis(150)).await;
        let jittered_at = clock.now();
        input.mouse_moved(at(2.0, 2.0), at(2.0, 2.0), OPTION);

        timeout(Duration::from_secs(1), dwell_rx.recv())
            .await
            .expect("dwell should survive the stale timer")
            .unwrap();
        assert!(clock.now() - jittered_at >= Duration::from_millis(200));
        pump.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn releasing_the_chord_cancels_the_timer() {
        let (mut pump, _clock) = pump();
        let mut held_rx = pump.subscribe_held();
        let (input, mut dwell_rx) = pump.start().unwrap();

        input.mouse_moved(at(5.0, 5.0), at(5.0, 5.0), OPTION);
        time::sleep(Duration::from_millis(100)).await;
        assert!(*held_rx.borrow_and_update());

        input.modifiers_changed(ModifierMask::EMPTY);
        assert!(timeout(Duration::from_secs(1), dwell_rx.recv()).await.is_err());
        assert!(!*held_rx.borrow_and_update());
        pump.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn held_notifications_fire_only_on_edges() {
        let (mut pump, _clock) = pump();
        let mut held_rx = pump.subscribe_held();
        let (input, _dwell_rx) = pump.start().unwrap();

        for step in 0..3 {
            input.mouse_moved(at(step as f64 * 20.0, 0.0), at(0.0, 0.0), OPTION);
        }
        time::sleep(Duration::from_millis(10)).await;
        assert!(held_rx.has_changed().unwrap());
        assert!(*held_rx.borrow_and_update());

        input.modifiers_changed(OPTION | ModifierMask::CAPS_LOCK);
        input.mouse_moved(at(90.0, 0.0), at(0.0, 0.0), OPTION);
        time::sleep(Duration::from_millis(10)).await;
        assert!(!held_rx.has_changed().unwrap());
        pump.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_then_start_never_delivers_a_stale_dwell() {
        let (mut pump, _clock) = pump();
        let (input, mut old_rx) = pump.start().unwrap();

        input.mouse_moved(at(1.0, 1.0), at(1.0, 1.0), OPTION);
        time::sleep(Duration::from_millis(50)).await;
        pump.stop().await.unwrap();
        assert!(!input.mouse_moved(at(1.0, 1.0), at(1.0, 1.0), OPTION));
        assert_eq!(old_rx.recv().await, None);

        let (_input, mut new_rx) = pump.start().unwrap();
        assert!(timeout(Duration::from_secs(1), new_rx.recv()).await.is_err());
        pump.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn restarted_pump_requires_a_fresh_arm() {
        let (mut pump, _clock) = pump();
        let (input, _rx) = pump.start().unwrap();
        input.mouse_moved(at(1.0, 1.0), at(1.0, 1.0), OPTION);
        time::sleep(Duration::from_millis(50)).await;
        pump.stop().await.unwrap();

        let (input, mut rx) = pump.start().unwrap();
        // Same spot: the stopped run's arm must not swallow this as "stationary".
        input.mouse_moved(at(1.0, 1.0), at(1.0, 1.0), OPTION);
        assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_some());
        pump.stop().await.unwrap();
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let (mut pump, _clock) = pump();
        let _running = pump.start().unwrap();
        assert!(pump.is_running());
        assert!(pump.start().is_err());
        pump.stop().await.unwrap();
        assert!(!pump.is_running());
    }
}
