//! Delivery of logs, events and tree changes to root observers.
//!
//! Observers are resolved through the emitting unit's root on every call so
//! re-parented units report to their new root immediately. A failing or
//! panicking observer is reported through `tracing` and skipped.

use crate::unit::ExecutionUnit;
use arborcore::{Event, LogEntry, Node, Observer, ObserverResult};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub(crate) fn log(unit: &ExecutionUnit, entry: &LogEntry) {
    for observer in observers_of(unit) {
        deliver(&observer, "on_log", |o| o.on_log(entry));
    }
}

pub(crate) fn event(unit: &ExecutionUnit, event: &Event) {
    for observer in observers_of(unit) {
        deliver(&observer, "on_event", |o| o.on_event(event));
    }
}

pub(crate) fn state_updated(unit: &ExecutionUnit) {
    let observers = observers_of(unit);
    if observers.is_empty() {
        return;
    }
    let node = unit.node();
    for observer in observers {
        deliver(&observer, "on_state_updated", |o| o.on_state_updated(&node));
    }
}

pub(crate) fn tree_changed(unit: &ExecutionUnit) {
    let observers = observers_of(unit);
    if observers.is_empty() {
        return;
    }
    let root: Node = match unit.root() {
        Ok(root) => root.node(),
        Err(_) => return,
    };
    for observer in observers {
        deliver(&observer, "on_tree_changed", |o| o.on_tree_changed(&root));
    }
}

fn observers_of(unit: &ExecutionUnit) -> Vec<Arc<dyn Observer>> {
    match unit.observers() {
        Ok(observers) => observers,
        Err(err) => {
            tracing::warn!(unit = %unit.label(), error = %err, "dropping notification, root unresolved");
            Vec::new()
        }
    }
}

fn deliver<F>(observer: &Arc<dyn Observer>, callback: &'static str, f: F)
where
    F: FnOnce(&dyn Observer) -> ObserverResult,
{
    match catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(observer = observer.name(), callback, error = %err, "observer callback failed");
        }
        Err(panic) => {
            tracing::error!(
                observer = observer.name(),
                callback,
                panic = panic_message(panic.as_ref()),
                "observer callback panicked"
            );
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
