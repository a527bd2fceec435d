pub mod clock;
pub mod pump;
pub mod state;

pub use clock::{Clock, MonotonicClock};
pub use pump::{EventPump, InputEvent, PumpHandle};
pub use state::{DwellAction, DwellConfig, DwellSnapshot, DwellStateMachine};
