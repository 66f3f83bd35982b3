//! Running Pipelines Registry
//!
//! The single source of truth for which pipelines are currently executing.
//!
//! All mutations go through one write lock and publish their event while
//! still holding it, so every subscriber of the running topic observes
//! updates in exactly the order they were applied. New subscribers take
//! their snapshot under the read lock, which makes "snapshot, then every
//! later update" atomic with respect to writers.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use pipeviz_core::domain::{PipelineIdentity, RunRef, RunningPipeline, StreamEvent};

use super::broker::{Broker, Subscription, Topic};

struct Entry {
    /// Insertion sequence; snapshots are ordered by it
    order: u64,
    pipeline: RunningPipeline,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<PipelineIdentity, Entry>,
    next_order: u64,
    next_revision: u64,
}

impl RegistryState {
    fn snapshot(&self) -> Vec<RunningPipeline> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.order);
        entries.into_iter().map(|e| e.pipeline.clone()).collect()
    }
}

/// In-memory registry of running pipelines
pub struct RunningPipelines {
    state: RwLock<RegistryState>,
    broker: Broker<StreamEvent>,
    topic: Topic,
}

impl RunningPipelines {
    pub fn new(broker: Broker<StreamEvent>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            broker,
            topic: Topic::running(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces the snapshot of a pipeline and broadcasts it
    ///
    /// # Returns
    /// The revision assigned to the stored snapshot
    pub fn upsert(&self, identity: PipelineIdentity, mut pipeline: RunningPipeline) -> u64 {
        let mut state = self.write();

        state.next_revision += 1;
        let revision = state.next_revision;
        pipeline.revision = revision;
        pipeline.updated_at = Utc::now();

        let order = match state.entries.get(&identity) {
            Some(existing) => existing.order,
            None => {
                state.next_order += 1;
                state.next_order
            }
        };
        state.entries.insert(
            identity,
            Entry {
                order,
                pipeline: pipeline.clone(),
            },
        );

        self.broker
            .publish(&self.topic, StreamEvent::PipelineUpdated(pipeline));
        revision
    }

    /// Removes a pipeline and broadcasts the removal
    ///
    /// Removing an unknown identity is a no-op and broadcasts nothing.
    pub fn remove(&self, identity: &PipelineIdentity) -> bool {
        let mut state = self.write();
        if state.entries.remove(identity).is_none() {
            return false;
        }

        self.broker
            .publish(&self.topic, StreamEvent::PipelineRemoved(identity.clone()));
        true
    }

    /// Removes every pipeline not in `keep`
    ///
    /// # Returns
    /// The identities that were removed
    pub fn retain(&self, keep: &HashSet<PipelineIdentity>) -> Vec<PipelineIdentity> {
        let mut state = self.write();
        let stale: Vec<PipelineIdentity> = state
            .entries
            .keys()
            .filter(|identity| !keep.contains(*identity))
            .cloned()
            .collect();

        for identity in &stale {
            state.entries.remove(identity);
            self.broker
                .publish(&self.topic, StreamEvent::PipelineRemoved(identity.clone()));
        }
        stale
    }

    /// All running pipelines, oldest first
    pub fn snapshot(&self) -> Vec<RunningPipeline> {
        self.read().snapshot()
    }

    pub fn get(&self, identity: &PipelineIdentity) -> Option<RunningPipeline> {
        self.read()
            .entries
            .get(identity)
            .map(|e| e.pipeline.clone())
    }

    pub fn contains(&self, identity: &PipelineIdentity) -> bool {
        self.read().entries.contains_key(identity)
    }

    /// Looks a pipeline up by its provider-less address
    pub fn find(&self, run: &RunRef) -> Option<RunningPipeline> {
        self.read()
            .entries
            .iter()
            .find(|(identity, _)| identity.run_ref() == *run)
            .map(|(_, e)| e.pipeline.clone())
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribes to registry changes
    ///
    /// The first event received is always a `Snapshot` of the current
    /// contents, followed by every update applied after it.
    pub fn subscribe(&self) -> Subscription<StreamEvent> {
        let state = self.read();
        let snapshot = StreamEvent::Snapshot(state.snapshot());
        self.broker.subscribe_with(self.topic.clone(), [snapshot])
    }
}
