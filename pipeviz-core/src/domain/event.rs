//! Outbound stream events
//!
//! Everything a viewer can receive over an event stream. Each event has a
//! stable type name and a JSON payload, which map one-to-one onto the
//! `event:` and `data:` fields of the event-stream framing.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::identity::PipelineIdentity;
use super::log::LogLine;
use super::pipeline::{PipelineStatus, RunningPipeline};

/// Final outcome reported when a live log stream ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Failure,
    Aborted,
    /// The run had not reached a terminal state when the stream gave up waiting
    Unknown,
}

impl RunOutcome {
    pub fn from_status(status: PipelineStatus) -> Self {
        match status {
            PipelineStatus::Succeeded => Self::Success,
            PipelineStatus::Failed => Self::Failure,
            PipelineStatus::Aborted => Self::Aborted,
            PipelineStatus::Pending | PipelineStatus::Running => Self::Unknown,
        }
    }
}

/// Why a live log stream ended early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamErrorKind {
    /// The run does not exist
    NotFound,
    /// The cluster API could not be reached or kept failing
    Unavailable,
    /// A step's container never became available within the wait ceiling
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Snapshot(Vec<RunningPipeline>),
    PipelineUpdated(RunningPipeline),
    PipelineRemoved(PipelineIdentity),
    LogLine(LogLine),
    StepComplete {
        step_index: usize,
    },
    StreamEnded {
        status: RunOutcome,
    },
    StreamError {
        kind: StreamErrorKind,
        message: String,
    },
}

impl StreamEvent {
    /// Event type name used on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::PipelineUpdated(_) => "pipeline-updated",
            Self::PipelineRemoved(_) => "pipeline-removed",
            Self::LogLine(_) => "log-line",
            Self::StepComplete { .. } => "step-complete",
            Self::StreamEnded { .. } => "stream-ended",
            Self::StreamError { .. } => "stream-error",
        }
    }

    /// JSON payload used on the wire
    pub fn data(&self) -> serde_json::Result<String> {
        match self {
            Self::Snapshot(pipelines) => serde_json::to_string(pipelines),
            Self::PipelineUpdated(pipeline) => serde_json::to_string(pipeline),
            Self::PipelineRemoved(identity) => serde_json::to_string(identity),
            Self::LogLine(line) => serde_json::to_string(line),
            Self::StepComplete { step_index } => {
                serde_json::to_string(&json!({ "step_index": step_index }))
            }
            Self::StreamEnded { status } => serde_json::to_string(&json!({ "status": status })),
            Self::StreamError { kind, message } => {
                serde_json::to_string(&json!({ "kind": kind, "message": message }))
            }
        }
    }

    /// Whether no further events follow this one on its stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamEnded { .. } | Self::StreamError { .. })
    }
}
