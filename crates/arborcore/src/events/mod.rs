// crates/arborcore/src/events/mod.rs

mod base;
mod bus;

pub use base::{Event, EventId, EventKind};
pub use bus::{BusObserver, EventBus};
