//! Data Transfer Objects for cluster communication
//!
//! This module contains the wire shapes exchanged with the cluster API
//! (list and watch payloads). Domain records live in `crate::domain`.

pub mod watch;
