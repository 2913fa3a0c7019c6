//! Field-level state observation.
//!
//! Owners of an execution unit describe their observable fields explicitly;
//! each field is either included as-is, left out of snapshots, or included
//! with its value replaced by [`REDACTED`].

use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholder written in place of redacted values
pub const REDACTED: &str = "[REDACTED]";

/// Observable fields of a unit at one point in time, keyed by field name
pub type StateSnapshot = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
    Redacted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservedField {
    pub name: String,
    pub value: Value,
    pub visibility: Visibility,
}

impl ObservedField {
    pub fn visible(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            visibility: Visibility::Visible,
        }
    }

    pub fn hidden(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            visibility: Visibility::Hidden,
            ..Self::visible(name, value)
        }
    }

    pub fn redacted(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            visibility: Visibility::Redacted,
            ..Self::visible(name, value)
        }
    }
}

/// Implemented by whatever owns a unit and wants its fields in snapshots
pub trait Observable: Send + Sync {
    fn observe(&self) -> Vec<ObservedField>;

    fn snapshot(&self) -> StateSnapshot {
        snapshot(self.observe())
    }
}

/// Build a snapshot, dropping hidden fields and masking redacted ones
pub fn snapshot(fields: impl IntoIterator<Item = ObservedField>) -> StateSnapshot {
    fields
        .into_iter()
        .filter_map(|field| match field.visibility {
            Visibility::Visible => Some((field.name, field.value)),
            Visibility::Hidden => None,
            Visibility::Redacted => Some((field.name, Value::from(REDACTED))),
        })
        .collect()
}
