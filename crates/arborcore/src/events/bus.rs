use crate::observers::{Observer, ObserverResult};
use crate::Event;
use tokio::sync::broadcast;

/// Broadcast channel fanning tree events out to async subscribers
///
/// Roots forward into the bus through a [`BusObserver`]; emitting with no
/// subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn observer(&self) -> BusObserver {
        BusObserver { bus: self.clone() }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Observer that republishes every event on an [`EventBus`]
pub struct BusObserver {
    bus: EventBus,
}

impl Observer for BusObserver {
    fn name(&self) -> &str {
        "event-bus"
    }

    fn on_event(&self, event: &Event) -> ObserverResult {
        self.bus.emit(event.clone());
        Ok(())
    }
}
