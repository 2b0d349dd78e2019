//! Orphaned-notification cleanup
//!
//! Entity deletion is not transactional with in-flight fan-out: a fan-out
//! racing a delete may land a notification whose entity no longer resolves.
//! The sweep removes those records on an interval. Best-effort by design.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::durable::DurableStore;
use crate::error::SyncError;

/// Remove notifications whose entity no longer resolves.
///
/// Returns the number of records removed.
pub fn sweep_orphans(durable: &DurableStore) -> Result<usize, SyncError> {
    let mut removed = 0usize;

    for record in durable.all_notifications()? {
        if durable.get_entity(&record.entity_id)?.is_some() {
            continue;
        }
        if durable.delete_notification(&record.recipient_id, &record.id)? {
            debug!(
                notification = %record.id,
                entity = %record.entity_id,
                "Removed orphaned notification"
            );
            removed += 1;
        }
    }

    Ok(removed)
}

/// Spawn a background task that sweeps on an interval
pub fn spawn_cleanup_task(durable: Arc<DurableStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Cleanup task started");
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately; skip it so startup stays quiet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match sweep_orphans(&durable) {
                Ok(0) => {}
                Ok(removed) => info!(removed = removed, "Cleanup sweep removed orphans"),
                Err(e) => warn!(error = %e, "Cleanup sweep failed"),
            }
        }
    })
}
