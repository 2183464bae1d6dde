//! `tarsy-domain` — shared vocabulary for the TARSy alert-triage service.
//!
//! This crate is pure data and contracts: configuration snapshots, the
//! typed error taxonomy, the session/stage/execution status machines,
//! chain definitions, the publish-event wire vocabulary, and the traits
//! that seam the investigation runner to the external agent layer.
//! No I/O lives here.

pub mod agent;
pub mod chain;
pub mod config;
pub mod error;
pub mod event;
pub mod status;

pub use error::{Error, Result};
