pub mod events;

pub use events::RelayEvent;
