use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Set of held modifier keys, stored as raw flag bits.
///
/// Only Command, Option, Shift and Control take part in chord matching; every other bit an
/// event source reports (caps lock, function, numeric pad...) is dropped by [`ModifierMask::filtered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModifierMask(u32);

impl ModifierMask {
    pub const EMPTY: ModifierMask = ModifierMask(0);
    pub const COMMAND: ModifierMask = ModifierMask(1 << 0);
    pub const OPTION: ModifierMask = ModifierMask(1 << 1);
    pub const SHIFT: ModifierMask = ModifierMask(1 << 2);
    pub const CONTROL: ModifierMask = ModifierMask(1 << 3);
    pub const CAPS_LOCK: ModifierMask = ModifierMask(1 << 4);
    pub const FUNCTION: ModifierMask = ModifierMask(1 << 5);

    const MONITORED: u32 =
        Self::COMMAND.0 | Self::OPTION.0 | Self::SHIFT.0 | Self::CONTROL.0;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn filtered(self) -> Self {
        Self(self.0 & Self::MONITORED)
    }

    /// True when every bit of `required` is present in `self`.
    pub const fn contains_all(self, required: ModifierMask) -> bool {
        self.0 & required.0 == required.0
    }
}

impl BitOr for ModifierMask {
    type Output = ModifierMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        ModifierMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for ModifierMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Modifier chords a user can pick for the hover trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HeldKey {
    Option,
    Control,
    ShiftOption,
}

impl Default for HeldKey {
    fn default() -> Self {
        HeldKey::Option
    }
}

impl HeldKey {
    pub fn mask(self) -> ModifierMask {
        match self {
            HeldKey::Option => ModifierMask::OPTION,
            HeldKey::Control => ModifierMask::CONTROL,
            HeldKey::ShiftOption => ModifierMask::SHIFT | ModifierMask::OPTION,
        }
    }
}
