#![forbid(unsafe_code)]

//! Session and agent-execution state for a horizontally scaled
//! alert-analysis service.
//!
//! Workers share one `SQLite` store. Coordination happens only through
//! guarded writes: claiming pending sessions, heartbeats, cooperative
//! cancellation, stage status aggregation, and retention sweeps.

pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
