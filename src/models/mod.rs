pub mod geometry;
pub mod modifiers;
pub mod target;

pub use geometry::{Point, PointerSample};
pub use modifiers::{HeldKey, ModifierMask};
pub use target::{ActionKind, CompletedAction, Decision, TargetItem};
