use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::Day;
use crate::observability::STAYS_COMPLETED_TOTAL;

/// Mark confirmed stays that ended on or before `today` as completed.
pub async fn sweep_once(engine: &Engine, today: Day) -> Result<Vec<Ulid>, EngineError> {
    let completed = engine.complete_finished_stays(today).await?;
    if !completed.is_empty() {
        metrics::counter!(STAYS_COMPLETED_TOTAL).increment(completed.len() as u64);
        info!(count = completed.len(), %today, "completed finished stays");
    }
    Ok(completed)
}

/// Background task that completes finished stays and prunes idle notification channels.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        let today = Local::now().date_naive();
        if let Err(e) = sweep_once(&engine, today).await {
            warn!(error = %e, "stay sweep failed");
        }
        let pruned = engine.notify.prune();
        if pruned > 0 {
            debug!(pruned, "dropped idle notification channels");
        }
    }
}

/// Compact the WAL once `threshold` appends have piled up since the last compaction.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not needed");
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!(appends, "WAL compacted");
    Ok(true)
}

pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            warn!(error = %e, "WAL compaction failed");
        }
    }
}
