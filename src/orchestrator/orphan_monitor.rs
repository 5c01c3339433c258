//! Background scan for `in_progress` sessions whose worker stopped
//! heartbeating.
//!
//! Every detected orphan is logged. The configured [`OrphanAction`] then
//! decides whether the session is left for an operator, failed, or returned
//! to the pending queue. Remediation writes are conditioned on the row being
//! unchanged since the scan, so a late heartbeat always wins.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::{GlobalConfig, OrphanAction};
use crate::lifecycle::{PeriodicTask, TaskPhase};
use crate::persistence::Store;
use crate::Result;

use super::session_manager::{find_orphaned, recover_orphan};

/// Counts from one orphan scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrphanScan {
    /// Sessions past the heartbeat timeout.
    pub detected: usize,
    /// Sessions the configured action changed.
    pub recovered: usize,
}

/// Scan once and apply `action` to every orphan found.
///
/// A failure on one orphan is logged and does not stop the others.
///
/// # Errors
///
/// Returns `AppError::Db` if the scan query itself fails.
pub async fn scan_once(
    store: &Store,
    timeout: Duration,
    action: OrphanAction,
) -> Result<OrphanScan> {
    let orphans = find_orphaned(store, timeout).await?;
    let mut scan = OrphanScan {
        detected: orphans.len(),
        recovered: 0,
    };

    for session in &orphans {
        warn!(
            session_id = %session.id,
            pod_id = session.pod_id.as_deref(),
            last_interaction_at = ?session.last_interaction_at,
            "orphaned session detected"
        );
        match recover_orphan(store, session, action).await {
            Ok(true) => scan.recovered += 1,
            Ok(false) => {}
            Err(err) => error!(session_id = %session.id, %err, "orphan recovery failed"),
        }
    }

    Ok(scan)
}

/// Spawn the orphan scan loop.
///
/// Scans immediately, then once per `interval` until `cancel` fires.
#[must_use]
pub fn spawn_orphan_monitor(
    store: Store,
    timeout: Duration,
    interval: Duration,
    action: OrphanAction,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("orphan monitor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match scan_once(&store, timeout, action).await {
                            Ok(scan) if scan.detected > 0 => info!(
                                detected = scan.detected,
                                recovered = scan.recovered,
                                "orphan scan completed"
                            ),
                            Ok(_) => {}
                            Err(err) => error!(
                                %err,
                                retryable = err.is_retryable(),
                                "orphan scan failed"
                            ),
                        }
                    }
                }
            }
        }
        .instrument(info_span!("orphan_monitor")),
    )
}

/// Orphan scan loop with an explicit start/stop lifecycle.
pub struct OrphanMonitor {
    store: Store,
    timeout: Duration,
    interval: Duration,
    action: OrphanAction,
    task: PeriodicTask,
}

impl OrphanMonitor {
    /// Create an idle monitor.
    #[must_use]
    pub fn new(store: Store, timeout: Duration, interval: Duration, action: OrphanAction) -> Self {
        Self {
            store,
            timeout,
            interval,
            action,
            task: PeriodicTask::new("orphan_monitor"),
        }
    }

    /// Create an idle monitor from the `[orphans]` configuration section.
    #[must_use]
    pub fn from_config(store: Store, config: &GlobalConfig) -> Self {
        Self::new(
            store,
            config.orphan_timeout(),
            config.orphan_check_interval(),
            config.orphans.action,
        )
    }

    /// Start the loop; returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let store = self.store.clone();
        let (timeout, interval, action) = (self.timeout, self.interval, self.action);
        self.task
            .start(move |cancel| spawn_orphan_monitor(store, timeout, interval, action, cancel))
    }

    /// Signal shutdown and wait for any in-flight scan to finish.
    pub async fn stop(&self) {
        self.task.stop().await;
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> TaskPhase {
        self.task.phase()
    }

    /// Scan once on the caller's task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the scan query fails.
    pub async fn run_once(&self) -> Result<OrphanScan> {
        scan_once(&self.store, self.timeout, self.action).await
    }
}
