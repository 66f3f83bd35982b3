//! Log domain types

use serde::{Deserialize, Serialize};

/// Where one step's output currently lives
///
/// The mapping can change when pods are rescheduled or steps retried, so
/// consumers re-resolve it instead of caching it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStep {
    pub step_index: usize,
    pub container_name: String,
    pub pod_name: String,
}

impl LogStep {
    /// Whether the step has been placed on a pod yet
    pub fn is_scheduled(&self) -> bool {
        !self.pod_name.is_empty()
    }
}

/// One line of live output, tagged with the step that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub step_index: usize,
    pub container: String,
    pub line: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
