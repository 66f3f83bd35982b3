//! Pipeviz Server
//!
//! Watches the build system's activity records, keeps an in-memory registry
//! of running pipelines and serves it, along with live step logs, as
//! server-sent event streams.

pub mod api;
pub mod config;
pub mod scheduler;
pub mod service;
pub mod signal;
