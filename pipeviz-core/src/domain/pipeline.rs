//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::activity::LegacyActivity;
use super::identity::PipelineIdentity;

/// Pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl PipelineStatus {
    /// Whether no further status transitions can occur
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    /// Maps the build system's free-form status strings onto the closed set
    ///
    /// Error-like states collapse into `Failed`, cancellation-like states into
    /// `Aborted`. Anything unrecognized is treated as not started yet.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" | "Error" | "TimedOut" => Self::Failed,
            "Aborted" | "Cancelled" => Self::Aborted,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Aborted => "Aborted",
        };
        f.write_str(s)
    }
}

/// Historical pipeline summary
///
/// The persisted shape shown on history pages. Running pipelines carry the
/// same shape as their snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPipeline {
    pub name: String,
    pub provider: String,
    pub owner: String,
    pub repository: String,
    pub branch: String,
    pub build: u32,
    /// Pull request number, when the provider reported one explicitly
    #[serde(default)]
    pub pull_request: Option<u64>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub commit_sha: String,
    /// Commit URL recorded by the build system; preferred over derivation
    #[serde(default)]
    pub commit_url: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    pub status: PipelineStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StoredPipeline {
    pub fn identity(&self) -> PipelineIdentity {
        PipelineIdentity::new(
            self.provider.clone(),
            self.owner.clone(),
            self.repository.clone(),
            self.branch.clone(),
            self.build,
        )
    }

    /// Pull request number as a string, if this pipeline built one
    ///
    /// The explicit field wins; otherwise a `PR-<n>` branch name is decoded.
    pub fn pull_request_number(&self) -> Option<String> {
        if let Some(number) = self.pull_request {
            return Some(number.to_string());
        }
        self.branch.strip_prefix("PR-").map(str::to_string)
    }

    /// Wall-clock duration, once both ends are known
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

/// A pipeline that is currently executing
///
/// Wraps the pipeline snapshot with its live status. Only the registry
/// mutates these; `revision` is assigned by the registry on every upsert and
/// strictly increases, so viewers can discard stale redeliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningPipeline {
    pub pipeline: StoredPipeline,
    pub status: PipelineStatus,
    /// Resource version of the cluster record this snapshot was built from
    #[serde(default)]
    pub resource_version: String,
    #[serde(default)]
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl RunningPipeline {
    pub fn new(pipeline: StoredPipeline, status: PipelineStatus) -> Self {
        Self {
            pipeline,
            status,
            resource_version: String::new(),
            revision: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> PipelineIdentity {
        self.pipeline.identity()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Borrowed view over the three pipeline shapes
///
/// Every derivation over pipelines dispatches on this closed set, so adding a
/// fourth shape is a compile error at each derivation until it is handled.
#[derive(Debug, Clone, Copy)]
pub enum PipelineVariant<'a> {
    Stored(&'a StoredPipeline),
    Running(&'a RunningPipeline),
    Activity(&'a LegacyActivity),
}

impl PipelineVariant<'_> {
    pub fn identity(&self) -> PipelineIdentity {
        match self {
            Self::Stored(p) => p.identity(),
            Self::Running(p) => p.identity(),
            Self::Activity(a) => a.identity(),
        }
    }
}

impl<'a> From<&'a StoredPipeline> for PipelineVariant<'a> {
    fn from(p: &'a StoredPipeline) -> Self {
        Self::Stored(p)
    }
}

impl<'a> From<&'a RunningPipeline> for PipelineVariant<'a> {
    fn from(p: &'a RunningPipeline) -> Self {
        Self::Running(p)
    }
}

impl<'a> From<&'a LegacyActivity> for PipelineVariant<'a> {
    fn from(a: &'a LegacyActivity) -> Self {
        Self::Activity(a)
    }
}
