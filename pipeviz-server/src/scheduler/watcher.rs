//! Activity watcher
//!
//! Keeps the running-pipelines registry in sync with the cluster's activity
//! records: list once, reconcile, then follow the watch stream. When the
//! watch breaks, or closes before delivering anything, it reconnects with
//! exponential backoff, and when the resume point has expired it relists and
//! reconciles again.
//!
//! Finished pipelines stay visible for a grace period before they are
//! removed. The removal timers live inside the watcher task, so the registry
//! keeps a single writer.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pipeviz_client::{ActivitySource, ClusterError};
use pipeviz_core::domain::{LegacyActivity, PipelineIdentity};
use pipeviz_core::dto::watch::{ActivityList, WatchEvent};

use crate::service::RunningPipelines;

/// Watcher timing configuration
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// How long a finished pipeline stays in the registry
    pub removal_grace: Duration,
    /// First reconnect delay; doubles after every failed attempt
    pub retry_initial: Duration,
    /// Upper bound of the reconnect delay
    pub retry_max: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            removal_grace: Duration::from_secs(30),
            retry_initial: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
        }
    }
}

/// How one watch session ended
enum WatchEnd {
    Shutdown,
    /// The server closed the stream; resume from the last resource version.
    /// `idle` when it closed without delivering a single event.
    Closed { idle: bool },
}

/// Feeds the registry from the cluster's activity records
pub struct ActivityWatcher {
    source: Arc<dyn ActivitySource>,
    registry: Arc<RunningPipelines>,
    config: WatcherConfig,
    /// Resume point; `None` forces a relist
    resource_version: Option<String>,
    /// Finished pipelines awaiting removal, in deadline order
    removals: VecDeque<(Instant, PipelineIdentity)>,
}

impl ActivityWatcher {
    pub fn new(
        source: Arc<dyn ActivitySource>,
        registry: Arc<RunningPipelines>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            source,
            registry,
            config,
            resource_version: None,
            removals: VecDeque::new(),
        }
    }

    /// Runs until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Starting activity watcher (removal grace: {:?})",
            self.config.removal_grace
        );

        let mut delay = self.config.retry_initial;
        loop {
            let resume = match self.watch_once(&shutdown, &mut delay).await {
                Ok(WatchEnd::Shutdown) => break,
                Ok(WatchEnd::Closed { idle: false }) => {
                    debug!("Watch closed by server, resuming");
                    true
                }
                Ok(WatchEnd::Closed { idle: true }) => {
                    debug!("Watch closed without events, resuming in {:?}", delay);
                    self.pause(&shutdown, &mut delay).await
                }
                Err(e) => {
                    if is_expired(&e) {
                        info!("Watch resume point expired, relisting");
                        self.resource_version = None;
                    } else {
                        warn!("Activity watch failed, retrying in {:?}: {:#}", delay, e);
                    }
                    self.pause(&shutdown, &mut delay).await
                }
            };
            if !resume {
                break;
            }
        }

        info!("Activity watcher stopped");
    }

    /// Sleeps one backoff delay, still honoring removal deadlines
    ///
    /// # Returns
    /// `false` when shutdown was requested meanwhile
    async fn pause(&mut self, shutdown: &CancellationToken, delay: &mut Duration) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = self.sleep_with_removals(*delay) => {}
        }
        *delay = (*delay * 2).min(self.config.retry_max);
        true
    }

    /// Lists if needed, then follows one watch stream until it ends
    async fn watch_once(
        &mut self,
        shutdown: &CancellationToken,
        delay: &mut Duration,
    ) -> Result<WatchEnd> {
        let resource_version = match self.resource_version.clone() {
            Some(version) => version,
            None => {
                let list = tokio::select! {
                    _ = shutdown.cancelled() => return Ok(WatchEnd::Shutdown),
                    list = self.source.list_activities() => list,
                }
                .context("Failed to list activities")?;
                self.reconcile(list)
            }
        };
        self.resource_version = Some(resource_version.clone());

        let mut events = tokio::select! {
            _ = shutdown.cancelled() => return Ok(WatchEnd::Shutdown),
            events = self.source.watch_activities(&resource_version) => events,
        }
        .context("Failed to start activity watch")?;

        debug!("Watching activities from version {}", resource_version);

        let mut idle = true;
        loop {
            let deadline = self.removals.front().map(|(at, _)| *at);
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(WatchEnd::Shutdown),
                _ = sleep_until(deadline) => self.flush_removals(),
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        if idle {
                            // the watch is healthy once it delivers
                            idle = false;
                            *delay = self.config.retry_initial;
                        }
                        if let Some(version) = event.resource_version() {
                            self.resource_version = Some(version.to_string());
                        }
                        self.apply(event);
                    }
                    Some(Err(e)) => return Err(e).context("Activity watch interrupted"),
                    None => return Ok(WatchEnd::Closed { idle }),
                },
            }
        }
    }

    /// Replaces the registry contents with a fresh list
    ///
    /// # Returns
    /// The list's resource version, to watch from
    fn reconcile(&mut self, list: ActivityList) -> String {
        let mut live = HashSet::new();
        for activity in &list.items {
            let Some(snapshot) = activity.to_running() else {
                continue;
            };
            let identity = snapshot.identity();
            // finished runs we never tracked are history, not running
            if snapshot.is_terminal() && !self.registry.contains(&identity) {
                continue;
            }
            live.insert(identity);
        }

        let removed = self.registry.retain(&live);
        if !removed.is_empty() {
            info!("Reconcile removed {} stale pipeline(s)", removed.len());
        }

        for activity in &list.items {
            self.observe(activity);
        }

        info!(
            "Reconciled {} activities, {} running",
            list.items.len(),
            self.registry.len()
        );
        list.metadata.resource_version
    }

    /// Applies one watch event to the registry
    fn apply(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::Added(activity) | WatchEvent::Modified(activity) => {
                self.observe(&activity)
            }
            WatchEvent::Deleted(activity) => {
                if activity.is_addressable() && self.registry.remove(&activity.identity()) {
                    debug!("Activity {} deleted", activity.metadata.name);
                }
            }
            WatchEvent::Bookmark(_) => {}
            WatchEvent::Error(status) => {
                warn!("Ignoring watch error event: {} {}", status.code, status.message);
            }
        }
    }

    /// Upserts an activity's snapshot, scheduling removal once it finishes
    fn observe(&mut self, activity: &LegacyActivity) {
        let Some(snapshot) = activity.to_running() else {
            debug!("Skipping unaddressable activity {}", activity.metadata.name);
            return;
        };
        let identity = snapshot.identity();
        let existing = self.registry.get(&identity);

        if let Some(existing) = &existing {
            // redelivery of a version we already applied
            if !snapshot.resource_version.is_empty()
                && existing.resource_version == snapshot.resource_version
            {
                return;
            }
        }

        if snapshot.is_terminal() {
            let Some(existing) = existing else {
                return;
            };
            let newly_finished = !existing.is_terminal();
            info!("Pipeline {} finished: {}", identity, snapshot.status);
            self.registry.upsert(identity.clone(), snapshot);
            if newly_finished {
                self.removals
                    .push_back((Instant::now() + self.config.removal_grace, identity));
            }
        } else {
            if existing.is_none() {
                info!("Pipeline {} started", identity);
            }
            self.registry.upsert(identity, snapshot);
        }
    }

    /// Removes finished pipelines whose grace period has elapsed
    fn flush_removals(&mut self) {
        let now = Instant::now();
        while let Some((at, _)) = self.removals.front() {
            if *at > now {
                break;
            }
            let Some((_, identity)) = self.removals.pop_front() else {
                break;
            };
            // a relist may already have dropped it
            if self
                .registry
                .get(&identity)
                .is_some_and(|p| p.is_terminal())
            {
                self.registry.remove(&identity);
                debug!("Removed finished pipeline {}", identity);
            }
        }
    }

    /// Sleeps for `delay` while still honoring removal deadlines
    async fn sleep_with_removals(&mut self, delay: Duration) {
        let until = Instant::now() + delay;
        loop {
            let next = self.removals.front().map(|(at, _)| *at).filter(|at| *at < until);
            match next {
                Some(at) => {
                    time::sleep_until(at).await;
                    self.flush_removals();
                }
                None => {
                    time::sleep_until(until).await;
                    return;
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn is_expired(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<ClusterError>(),
        Some(ClusterError::WatchExpired(_))
    )
}
