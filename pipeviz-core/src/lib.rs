//! Pipeviz Core
//!
//! Core types and pure derivations for the pipeline visualizer.
//!
//! This crate contains:
//! - Domain types: pipeline identity, the three pipeline shapes, log steps, stream events
//! - DTOs: cluster watch payloads exchanged with the cluster API
//! - Links: provider-specific URL derivation for any pipeline shape
//! - Trace: the trace URL template compiled once at startup

pub mod domain;
pub mod dto;
pub mod links;
pub mod trace;
