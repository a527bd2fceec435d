use std::time::Duration;

use crate::models::{ModifierMask, Point, PointerSample};

/// Slack subtracted from the dwell threshold when a timer fires, so scheduler jitter that
/// wakes us a hair early still counts as a full dwell. Never applied in the other direction.
pub const DWELL_JITTER_EPSILON: Duration = Duration::from_millis(1);

pub const DEFAULT_MOVEMENT_TOLERANCE: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwellAction {
    StartDwell,
    CancelDwell,
    None,
}

/// What a successful dwell resolved to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DwellSnapshot {
    pub display_location: Point,
    pub hit_test_location: Point,
    pub modifiers: ModifierMask,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DwellConfig {
    pub dwell_threshold: Duration,
    pub debounce_interval: Duration,
    pub required: ModifierMask,
    pub movement_tolerance: f64,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            dwell_threshold: Duration::from_millis(200),
            debounce_interval: Duration::from_millis(80),
            required: ModifierMask::OPTION,
            movement_tolerance: DEFAULT_MOVEMENT_TOLERANCE,
        }
    }
}

/// Turns pointer and modifier samples into dwell start/cancel decisions.
///
/// Synchronous and clock-free: every timestamp comes in with the event, so the machine can be
/// driven directly from tests. `dwell_armed` only ever holds while the chord is held.
#[derive(Debug, Clone)]
pub struct DwellStateMachine {
    config: DwellConfig,
    last_display_location: Option<Point>,
    last_hit_test_location: Option<Point>,
    last_movement_time: Option<Duration>,
    current_modifiers: ModifierMask,
    last_trigger_time: Option<Duration>,
    dwell_armed: bool,
    is_held: bool,
}

impl DwellStateMachine {
    pub fn new(config: DwellConfig) -> Self {
        Self {
            config,
            last_display_location: None,
            last_hit_test_location: None,
            last_movement_time: None,
            current_modifiers: ModifierMask::EMPTY,
            last_trigger_time: None,
            dwell_armed: false,
            is_held: false,
        }
    }

    pub fn config(&self) -> &DwellConfig {
        &self.config
    }

    pub fn required(&self) -> ModifierMask {
        self.config.required
    }

    pub fn is_armed(&self) -> bool {
        self.dwell_armed
    }

    pub fn is_held(&self) -> bool {
        self.is_held
    }

    pub fn current_modifiers(&self) -> ModifierMask {
        self.current_modifiers
    }

    pub fn last_display_location(&self) -> Option<Point> {
        self.last_display_location
    }

    pub fn last_hit_test_location(&self) -> Option<Point> {
        self.last_hit_test_location
    }

    /// Drop any pending arm, keeping the last known locations and modifiers.
    pub fn disarm(&mut self) {
        self.dwell_armed = false;
    }

    pub fn handle_mouse_move(&mut self, sample: &PointerSample) -> DwellAction {
        let modifiers = sample.modifiers.filtered();
        let previous = self.last_display_location;

        self.last_display_location = Some(sample.display_location);
        self.last_hit_test_location = Some(sample.hit_test_location);
        self.last_movement_time = Some(sample.timestamp);
        self.current_modifiers = modifiers;
        self.is_held = modifiers.contains_all(self.config.required);

        if !self.is_held {
            self.dwell_armed = false;
            return DwellAction::CancelDwell;
        }

        if self.dwell_armed {
            if let Some(previous) = previous {
                if previous.distance_to(&sample.display_location) <= self.config.movement_tolerance {
                    return DwellAction::None;
                }
            }
        }

        self.dwell_armed = true;
        DwellAction::StartDwell
    }

    pub fn handle_modifier_change(
        &mut self,
        modifiers: ModifierMask,
        timestamp: Duration,
    ) -> DwellAction {
        let modifiers = modifiers.filtered();
        self.current_modifiers = modifiers;
        self.is_held = modifiers.contains_all(self.config.required);

        if !self.is_held {
            self.dwell_armed = false;
            return DwellAction::CancelDwell;
        }

        self.last_movement_time = Some(timestamp);

        if self.last_display_location.is_some() && !self.dwell_armed {
            self.dwell_armed = true;
            return DwellAction::StartDwell;
        }

        DwellAction::None
    }

    /// Called when a scheduled dwell timer elapses.
    ///
    /// `None` with the machine still armed means the timer was early (debounce window or a
    /// newer movement); the caller is expected to schedule another one.
    pub fn handle_dwell_timer(&mut self, timestamp: Duration) -> Option<DwellSnapshot> {
        let (Some(last_movement), Some(display_location), Some(hit_test_location)) = (
            self.last_movement_time,
            self.last_display_location,
            self.last_hit_test_location,
        ) else {
            self.dwell_armed = false;
            return None;
        };

        if !self.dwell_armed || !self.is_held {
            self.dwell_armed = false;
            return None;
        }

        if let Some(last_trigger) = self.last_trigger_time {
            if timestamp.saturating_sub(last_trigger) < self.config.debounce_interval {
                return None;
            }
        }

        let elapsed = timestamp.saturating_sub(last_movement);
        if elapsed + DWELL_JITTER_EPSILON < self.config.dwell_threshold {
            return None;
        }

        self.dwell_armed = false;
        self.last_trigger_time = Some(timestamp);
        Some(DwellSnapshot {
            display_location,
            hit_test_location,
            modifiers: self.current_modifiers,
        })
    }
}
