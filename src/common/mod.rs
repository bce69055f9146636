pub mod clock;
pub mod events;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::PresenceEvent;
pub use types::{Color, Friend, Message, MidnightPolicy, Signal, TimeOfDay, TimeoutWindow};
