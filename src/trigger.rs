//! Sync trigger engine
//!
//! Consumes ledger events and projects them into the durable store: one
//! logical handler per `(entity, interaction kind)` metric, each write a
//! merge patch of the absolute post-write counter value. Handlers are
//! stateless and safe to re-run; redelivered or out-of-order events can
//! only produce a stale mirror that the next event corrects.
//!
//! ```text
//! FastLedger ──► EventBus ──► TriggerEngine ──┬─► DurableStore (counter mirror)
//!                                             └─► FanOutService (notifications)
//! ```
//!
//! Sync failures are contained here: bounded backoff, then log and drop.
//! The client-facing write already committed to the ledger and must not
//! observe downstream health.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::durable::DurableStore;
use crate::error::SyncError;
use crate::events::LedgerEvent;
use crate::fanout::{FanOutService, NotificationEvent};
use crate::retry::{with_backoff, RetryPolicy};

/// Spawn the trigger engine task.
///
/// Runs until the event bus closes. Events are processed in delivery order;
/// because every counter write carries the absolute value, a skipped or
/// lagged event costs staleness, never corruption.
pub fn spawn_trigger_engine(
    mut receiver: broadcast::Receiver<LedgerEvent>,
    durable: Arc<DurableStore>,
    fanout: Arc<FanOutService>,
    config: &Config,
) -> JoinHandle<()> {
    let policy = RetryPolicy::new(config.retry_attempts, config.retry_base_delay());
    let store_timeout = config.store_timeout();

    tokio::spawn(async move {
        info!("Trigger engine started");
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    process_event(&durable, &fanout, policy, store_timeout, event).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Absolute-value writes self-correct on the next event
                    warn!(skipped = n, "Trigger engine lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Event bus closed, trigger engine stopping");
                    break;
                }
            }
        }
    })
}

/// Handle one ledger event: mirror the counter, then fan out.
pub(crate) async fn process_event(
    durable: &Arc<DurableStore>,
    fanout: &Arc<FanOutService>,
    policy: RetryPolicy,
    store_timeout: Duration,
    event: LedgerEvent,
) {
    sync_counter(durable, policy, store_timeout, &event).await;

    // ToggledOff never notifies: notifications are not retracted and
    // un-toggling is not an event the recipient should see.
    let notification = match &event {
        LedgerEvent::ToggledOn {
            entity_id,
            kind,
            actor_id,
            ..
        } => Some(NotificationEvent::for_entity_owner(
            entity_id,
            (*kind).into(),
            actor_id,
            None,
        )),
        LedgerEvent::Appended {
            entity_id,
            kind,
            actor_id,
            preview,
            ..
        } => Some(NotificationEvent::for_entity_owner(
            entity_id,
            (*kind).into(),
            actor_id,
            preview.clone(),
        )),
        LedgerEvent::ToggledOff { .. } => None,
    };

    if let Some(notification) = notification {
        if let Err(e) = fanout.dispatch(notification).await {
            warn!(
                entity = %event.entity_id(),
                kind = %event.kind(),
                error = %e,
                "Fan-out failed; interaction remains committed"
            );
        }
    }
}

/// Mirror the absolute counter value into the durable store.
async fn sync_counter(
    durable: &Arc<DurableStore>,
    policy: RetryPolicy,
    store_timeout: Duration,
    event: &LedgerEvent,
) {
    let entity_id = event.entity_id().to_string();
    let kind = event.kind();
    let value = event.counter();

    let result = with_backoff("counter_sync", policy, || {
        let durable = durable.clone();
        let entity_id = entity_id.clone();
        async move {
            match timeout(store_timeout, async { durable.sync_counter(&entity_id, kind, value) })
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(format!(
                    "counter sync for {}:{}",
                    entity_id, kind
                ))),
            }
        }
    })
    .await;

    match result {
        Ok(true) => {}
        Ok(false) => {
            // Entity deleted mid-flight; cleanup sweep owns the leftovers
            debug!(entity = %entity_id, kind = %kind, "No entity document to mirror into");
        }
        Err(e) => {
            warn!(
                entity = %entity_id,
                kind = %kind,
                value = value,
                error = %e,
                "Counter mirror failed; stale until next write"
            );
        }
    }
}
