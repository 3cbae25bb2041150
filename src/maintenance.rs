use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};

/// Background task that runs the maintenance job once at startup and then
/// every `period` until `cancel` fires. Ticks missed while a run was in
/// progress are skipped, not bunched up.
pub async fn run_scheduler(engine: Arc<Engine>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        match engine.run_maintenance().await {
            Ok(summary) => debug!(%summary, "scheduled maintenance done"),
            Err(EngineError::MaintenanceInProgress) => {}
            Err(e) => warn!("scheduled maintenance failed: {e}"),
        }
    }
    info!("maintenance scheduler stopped");
}

/// Background task that rewrites the WAL once it has grown past `threshold`
/// appends since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => debug!(appends, "compactor ran"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
