//! Core domain types
//!
//! This module contains the core domain structures used across pipeviz crates.
//! The cluster client produces them, the server indexes and streams them.

pub mod activity;
pub mod event;
pub mod identity;
pub mod log;
pub mod pipeline;

pub use activity::{ActivitySpec, ActivityStep, LegacyActivity};
pub use event::{RunOutcome, StreamErrorKind, StreamEvent};
pub use identity::{PipelineIdentity, RunRef};
pub use log::{LogLine, LogStep};
pub use pipeline::{PipelineStatus, PipelineVariant, RunningPipeline, StoredPipeline};
