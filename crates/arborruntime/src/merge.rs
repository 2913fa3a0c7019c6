use arborcore::WorkflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default bound on nested merging when merging is enabled
pub const DEFAULT_MAX_MERGE_DEPTH: usize = 3;

pub type CombineFn = Arc<dyn Fn(Vec<WorkflowError>) -> WorkflowError + Send + Sync>;

/// How failures of concurrently run siblings collapse into the one error a task reports
///
/// Disabled (the default) reports the first failure in sibling order.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorMergeStrategy {
    pub enabled: bool,
    pub max_merge_depth: Option<usize>,
    #[serde(skip, default = "default_combine")]
    combine: CombineFn,
}

fn default_combine() -> CombineFn {
    Arc::new(combine_messages)
}

impl Default for ErrorMergeStrategy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_merge_depth: None,
            combine: default_combine(),
        }
    }
}

impl ErrorMergeStrategy {
    pub fn first_error() -> Self {
        Self::default()
    }

    /// Merge every failure with [`combine_messages`]
    pub fn merged() -> Self {
        Self {
            enabled: true,
            max_merge_depth: Some(DEFAULT_MAX_MERGE_DEPTH),
            ..Self::default()
        }
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_merge_depth = depth;
        self
    }

    pub fn with_combine<F>(mut self, combine: F) -> Self
    where
        F: Fn(Vec<WorkflowError>) -> WorkflowError + Send + Sync + 'static,
    {
        self.enabled = true;
        self.combine = Arc::new(combine);
        self
    }

    /// Collapse failures, given in sibling order, into the error to report
    pub fn resolve(&self, mut errors: Vec<WorkflowError>) -> Option<WorkflowError> {
        if errors.is_empty() {
            return None;
        }
        if !self.enabled || errors.len() == 1 {
            return Some(errors.swap_remove(0));
        }
        let mut combined = (self.combine)(errors);
        if let Some(max_depth) = self.max_merge_depth {
            combined.limit_merge_depth(max_depth);
        }
        Some(combined)
    }
}

impl fmt::Debug for ErrorMergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorMergeStrategy")
            .field("enabled", &self.enabled)
            .field("max_merge_depth", &self.max_merge_depth)
            .finish_non_exhaustive()
    }
}

/// Join every message into one error that keeps the originals as `merged`
///
/// The combined error is attributed to the first failing unit and carries
/// the logs of every failure, in order.
pub fn combine_messages(errors: Vec<WorkflowError>) -> WorkflowError {
    let Some(first) = errors.first() else {
        return WorkflowError::new("no failures", uuid::Uuid::nil());
    };
    let unit_id = first.unit_id;
    let message = format!(
        "{} concurrent failures: {}",
        errors.len(),
        errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    );
    let logs = errors.iter().flat_map(|e| e.logs.iter().cloned()).collect();
    WorkflowError::new(message, unit_id)
        .with_logs(logs)
        .with_merged(errors)
}
