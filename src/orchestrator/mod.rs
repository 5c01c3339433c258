//! Session orchestration modules.
//!
//! Covers alert submission and claiming, stage and agent-execution
//! bookkeeping, stage status aggregation, and orphan detection.

pub mod claim_manager;
pub mod execution_manager;
pub mod orphan_monitor;
pub mod session_manager;
pub mod stage_aggregator;
