mod bus;
mod types;

pub use bus::{create_event_bus, EventBus, DEFAULT_CHANNEL_CAPACITY};
pub use types::Event;
