//! Service Module
//!
//! In-memory state and background work behind the HTTP layer: the event
//! broker, the running-pipelines registry and live log sessions.

pub mod broker;
pub mod registry;
pub mod streamer;

pub use broker::{Broker, OverflowPolicy, Subscription, Topic};
pub use registry::RunningPipelines;
pub use streamer::{LiveLogSessions, LiveSession, StreamerConfig};
