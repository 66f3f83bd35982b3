//! Cluster-native pipeline activity records
//!
//! These are owned by the build system itself. Pipeviz only reads them:
//! the watcher turns them into running pipelines and the log streamer reads
//! their step list to find where each step's output lives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::identity::PipelineIdentity;
use super::log::LogStep;
use super::pipeline::{PipelineStatus, RunningPipeline, StoredPipeline};
use crate::links::Provider;

/// Activity record as stored in the cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyActivity {
    #[serde(default)]
    pub metadata: ActivityMeta,
    #[serde(default)]
    pub spec: ActivitySpec,
}

/// Object metadata of an activity record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub resource_version: String,
}

/// Git and execution details of an activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySpec {
    #[serde(default)]
    pub pipeline: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub git_owner: String,
    #[serde(default)]
    pub git_repository: String,
    #[serde(default)]
    pub git_branch: String,
    #[serde(default)]
    pub git_url: String,
    #[serde(default, rename = "lastCommitSHA")]
    pub last_commit_sha: String,
    #[serde(default, rename = "lastCommitURL")]
    pub last_commit_url: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, rename = "traceID")]
    pub trace_id: String,
    #[serde(default)]
    pub started_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<ActivityStep>,
}

/// One step of an activity, as reported by the build system
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStep {
    pub name: String,
    /// Pod the step runs in; empty while the pod is still being scheduled
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub status: String,
}

impl LegacyActivity {
    /// Provider of this activity's repository
    ///
    /// An explicit `provider` label wins, even when it names a provider we
    /// cannot link to. Otherwise the git URL is matched against known
    /// providers. Empty when neither applies.
    pub fn provider(&self) -> String {
        if let Some(label) = self
            .metadata
            .labels
            .get("provider")
            .filter(|label| !label.is_empty())
        {
            return label.clone();
        }

        Provider::infer_from_url(&self.spec.git_url)
            .map(|p| p.name().to_string())
            .unwrap_or_default()
    }

    /// Build number; zero when the record carries none or garbage
    pub fn build_number(&self) -> u32 {
        self.spec.build.trim().parse().unwrap_or(0)
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus::parse(&self.spec.status)
    }

    pub fn identity(&self) -> PipelineIdentity {
        PipelineIdentity::new(
            self.provider(),
            self.spec.git_owner.clone(),
            self.spec.git_repository.clone(),
            self.spec.git_branch.clone(),
            self.build_number(),
        )
    }

    /// Whether the record carries enough git metadata to be addressed
    pub fn is_addressable(&self) -> bool {
        !self.spec.git_owner.is_empty()
            && !self.spec.git_repository.is_empty()
            && !self.spec.git_branch.is_empty()
            && self.build_number() > 0
    }

    /// Ordered log locations of this activity's steps
    ///
    /// Steps without an explicit container use the build system's
    /// `step-<name>` container naming.
    pub fn log_steps(&self) -> Vec<LogStep> {
        self.spec
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let container_name = if step.container_name.is_empty() {
                    format!("step-{}", step.name)
                } else {
                    step.container_name.clone()
                };
                LogStep {
                    step_index: index,
                    container_name,
                    pod_name: step.pod_name.clone(),
                }
            })
            .collect()
    }

    /// Stored-shape summary of this activity
    pub fn to_stored(&self) -> StoredPipeline {
        let name = if self.spec.pipeline.is_empty() {
            format!(
                "{}/{}/{}",
                self.spec.git_owner, self.spec.git_repository, self.spec.git_branch
            )
        } else {
            self.spec.pipeline.clone()
        };

        StoredPipeline {
            name,
            provider: self.provider(),
            owner: self.spec.git_owner.clone(),
            repository: self.spec.git_repository.clone(),
            branch: self.spec.git_branch.clone(),
            build: self.build_number(),
            pull_request: None,
            author: self.spec.author.clone(),
            commit_sha: self.spec.last_commit_sha.clone(),
            commit_url: non_empty(&self.spec.last_commit_url),
            trace_id: non_empty(&self.spec.trace_id),
            status: self.status(),
            started_at: self.spec.started_timestamp,
            completed_at: self.spec.completed_timestamp,
        }
    }

    /// Running-pipeline snapshot of this activity, if it is addressable
    pub fn to_running(&self) -> Option<RunningPipeline> {
        if !self.is_addressable() {
            return None;
        }

        let mut running = RunningPipeline::new(self.to_stored(), self.status());
        running.resource_version = self.metadata.resource_version.clone();
        Some(running)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
