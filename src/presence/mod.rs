pub mod allocator;
pub mod codes;
pub mod messages;
pub mod monitor;
pub mod registry;
pub mod signals;

pub use allocator::{AllocationStrategy, ColorAllocator, PaletteAllocator, PaletteExhausted};
pub use codes::CodeBook;
pub use messages::MessageLog;
pub use monitor::PresenceMonitor;
pub use registry::FriendRegistry;
pub use signals::SignalQueue;
