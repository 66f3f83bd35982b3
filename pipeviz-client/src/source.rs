//! Source traits
//!
//! The server consumes the cluster only through these traits, so the watch
//! loop and the log streamer can run against in-memory fakes in tests.
//! `ClusterClient` is the production implementation of both.

use async_trait::async_trait;
use futures::stream::BoxStream;

use pipeviz_core::domain::{
    LegacyActivity, LogStep, PipelineIdentity, PipelineStatus, RunRef,
};
use pipeviz_core::dto::watch::{ActivityList, WatchEvent};

use crate::error::Result;

/// Stream of watch events; ends when the server closes the watch
pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

/// Stream of log lines; ends when the container terminates
pub type LineStream = BoxStream<'static, Result<String>>;

/// Feed of activity records for the running-pipelines registry
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Lists every activity record along with the list's resource version
    async fn list_activities(&self) -> Result<ActivityList>;

    /// Watches activity changes after the given resource version
    async fn watch_activities(&self, resource_version: &str) -> Result<WatchStream>;
}

/// What the log streamer needs to know about one run
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRun {
    pub identity: PipelineIdentity,
    pub status: PipelineStatus,
    pub steps: Vec<LogStep>,
}

impl From<&LegacyActivity> for ResolvedRun {
    fn from(activity: &LegacyActivity) -> Self {
        Self {
            identity: activity.identity(),
            status: activity.status(),
            steps: activity.log_steps(),
        }
    }
}

/// Access to a single run's steps and container logs
#[async_trait]
pub trait RunSource: Send + Sync {
    /// Resolves a run's status and ordered steps
    ///
    /// Fails with `ClusterError::NotFound` when the run does not exist.
    async fn resolve_run(&self, run: &RunRef) -> Result<ResolvedRun>;

    /// Follows one container's log from the beginning
    ///
    /// Fails with `NotFound` when the container does not exist and
    /// `NotReady` when it has not started yet.
    async fn tail_container(&self, pod: &str, container: &str) -> Result<LineStream>;
}
