//! Service layer for koinonia-sync
//!
//! Wires the engine together and exposes the client-facing operations.
//! Every component takes its dependencies explicitly; nothing is a process
//! global, so tests construct the same graph against temp stores and a fake
//! gateway.
//!
//! ## Architecture
//!
//! ```text
//! Client calls (thin)
//!     ↓
//! InteractionService (validation, mention fan-out, cascades)
//!     ↓
//! FastLedger ──► EventBus ──► TriggerEngine ──► DurableStore / FanOut
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::durable::DurableStore;
use crate::error::SyncError;
use crate::events::EventBus;
use crate::fanout::{FanOutService, NotificationEvent};
use crate::interaction::{InteractionKind, InteractionRecord};
use crate::ledger::FastLedger;
use crate::push::PushGateway;
use crate::retry::{with_backoff, RetryPolicy};
use crate::trigger::spawn_trigger_engine;

/// Service container for dependency injection
pub struct Services {
    pub ledger: Arc<FastLedger>,
    pub durable: Arc<DurableStore>,
    pub fanout: Arc<FanOutService>,
    pub events: Arc<EventBus>,
    pub interactions: Arc<InteractionService>,
    trigger: JoinHandle<()>,
}

impl Services {
    /// Open both stores and start the trigger engine
    pub async fn open(
        config: &Config,
        gateway: Arc<dyn PushGateway>,
    ) -> Result<Self, SyncError> {
        let events = Arc::new(EventBus::with_capacity(config.bus_capacity));
        let durable = Arc::new(
            DurableStore::open(config.durable_db_path(), config.cache_capacity).await?,
        );
        let ledger =
            Arc::new(FastLedger::open(config.ledger_db_path(), events.clone()).await?);
        let fanout = Arc::new(FanOutService::new(durable.clone(), gateway, config));

        // Subscribe before any write so no event is missed
        let trigger =
            spawn_trigger_engine(events.subscribe(), durable.clone(), fanout.clone(), config);

        let interactions = Arc::new(InteractionService::new(
            ledger.clone(),
            durable.clone(),
            fanout.clone(),
            config,
        ));

        info!("Services started");

        Ok(Self {
            ledger,
            durable,
            fanout,
            events,
            interactions,
            trigger,
        })
    }

    /// Flush both stores and stop the trigger engine
    pub async fn shutdown(self) -> Result<(), SyncError> {
        self.ledger.flush().await?;
        self.durable.flush().await?;
        self.trigger.abort();
        info!("Services stopped");
        Ok(())
    }
}

/// Client-facing interaction operations
pub struct InteractionService {
    ledger: Arc<FastLedger>,
    durable: Arc<DurableStore>,
    fanout: Arc<FanOutService>,
    policy: RetryPolicy,
}

impl InteractionService {
    pub fn new(
        ledger: Arc<FastLedger>,
        durable: Arc<DurableStore>,
        fanout: Arc<FanOutService>,
        config: &Config,
    ) -> Self {
        Self {
            ledger,
            durable,
            fanout,
            policy: RetryPolicy::new(config.retry_attempts, config.retry_base_delay()),
        }
    }

    /// Toggle a presence-based interaction. Returns the new state.
    ///
    /// The ledger write is the whole client-visible operation: once it
    /// commits, downstream sync and notification health are invisible to
    /// the actor. Transient ledger failures retry here; permanent ones
    /// surface so the UI can roll back its optimistic state.
    pub async fn toggle(
        &self,
        entity_id: &str,
        kind: InteractionKind,
        actor_id: &str,
    ) -> Result<bool, SyncError> {
        let ledger = self.ledger.clone();
        let entity_id = entity_id.to_string();
        let actor_id = actor_id.to_string();

        with_backoff("toggle", self.policy, move || {
            let ledger = ledger.clone();
            let entity_id = entity_id.clone();
            let actor_id = actor_id.clone();
            async move { ledger.toggle_interaction(&entity_id, kind, &actor_id) }
        })
        .await
    }

    /// The actor's own current toggle state, read straight from the ledger
    /// for instant button rendering
    pub fn has_toggled(
        &self,
        entity_id: &str,
        kind: InteractionKind,
        actor_id: &str,
    ) -> Result<bool, SyncError> {
        self.ledger.is_set(entity_id, kind, actor_id)
    }

    /// Append a comment; mentions fan out directly (no ledger counter for
    /// mentions). Returns the comment id.
    pub async fn comment(
        &self,
        entity_id: &str,
        actor_id: &str,
        body: &str,
        mentions: &[String],
    ) -> Result<String, SyncError> {
        let record = InteractionRecord::new(entity_id, InteractionKind::Comment, actor_id)
            .with_body(body);
        let child_id = self.ledger.append_child(record)?;

        // Deduplicate the mention list; fan-out suppresses self-mentions
        let unique: HashSet<&String> = mentions.iter().collect();
        for recipient in unique {
            let event = NotificationEvent::mention(
                recipient,
                actor_id,
                entity_id,
                Some(body.to_string()),
            );
            if let Err(e) = self.fanout.dispatch(event).await {
                // Mentions are best-effort; the comment itself is committed
                debug!(recipient = %recipient, error = %e, "Mention fan-out failed");
            }
        }

        Ok(child_id)
    }

    /// Delete an entity and cascade over its interactions, counters and
    /// notifications. Best-effort: the entity delete is the authoritative
    /// step, the rest is cleanup that the sweep would also catch.
    pub async fn delete_entity(&self, entity_id: &str) -> Result<bool, SyncError> {
        let existed = self.durable.delete_entity(entity_id)?;
        self.ledger.purge_entity(entity_id)?;
        self.durable.delete_notifications_for_entity(entity_id)?;
        Ok(existed)
    }
}
