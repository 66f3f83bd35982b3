//! Scheduler layer for the server
//!
//! Background work that keeps the in-memory state in step with the cluster.

pub mod watcher;

pub use watcher::{ActivityWatcher, WatcherConfig};
