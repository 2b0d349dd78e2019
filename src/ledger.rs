//! Fast ledger - low-latency interaction and counter store
//!
//! First touch for every client interaction. Two sled trees:
//!
//! - `interactions` - one record per `(entity, kind, actor)` for toggle
//!   kinds, one per generated child id for append-only kinds
//! - `counters` - one big-endian i64 per `(entity, kind)`
//!
//! A toggle is a single multi-tree transaction: record insert/remove and
//! counter increment/decrement commit together, so the counter can never
//! drift from the set of records. Callers never read-modify-write a counter
//! value; all counter math happens inside the transaction or through sled's
//! atomic update primitive.
//!
//! Every committed write emits exactly one [`LedgerEvent`] carrying the
//! absolute post-write counter value.

use std::path::Path;
use std::sync::Arc;

use sled::transaction::TransactionError;
use sled::Transactional;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::events::{EventBus, LedgerEvent};
use crate::interaction::{InteractionKind, InteractionRecord};

fn encode_counter(value: i64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

fn decode_counter(bytes: &[u8]) -> i64 {
    let arr: [u8; 8] = match bytes.try_into() {
        Ok(arr) => arr,
        Err(_) => return 0,
    };
    i64::from_be_bytes(arr)
}

/// Ledger key for a toggle record or append-only child
fn interaction_key(entity_id: &str, kind: InteractionKind, suffix: &str) -> String {
    format!("{}:{}:{}", entity_id, kind.as_str(), suffix)
}

/// Ledger key for an aggregate counter
fn counter_key(entity_id: &str, kind: InteractionKind) -> String {
    format!("{}:{}", entity_id, kind.as_str())
}

/// Fast ledger backed by sled
pub struct FastLedger {
    db: sled::Db,
    interactions: sled::Tree,
    counters: sled::Tree,
    events: Arc<EventBus>,
}

impl FastLedger {
    /// Open or create the ledger database
    pub async fn open(path: impl AsRef<Path>, events: Arc<EventBus>) -> Result<Self, SyncError> {
        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = sled::open(path.as_ref())?;
        let interactions = db.open_tree("interactions")?;
        let counters = db.open_tree("counters")?;

        info!(path = %path.as_ref().display(), "Fast ledger opened");

        Ok(Self {
            db,
            interactions,
            counters,
            events,
        })
    }

    // =========================================================================
    // Write Primitives
    // =========================================================================

    /// Toggle a presence-based interaction.
    ///
    /// If the record exists it is removed and the counter decremented; if
    /// absent it is created and the counter incremented. One atomic
    /// transaction either way. Returns the new presence state.
    pub fn toggle_interaction(
        &self,
        entity_id: &str,
        kind: InteractionKind,
        actor_id: &str,
    ) -> Result<bool, SyncError> {
        if !kind.is_toggle() {
            return Err(SyncError::Internal(format!(
                "{} is append-only, use append_child",
                kind
            )));
        }

        let key = interaction_key(entity_id, kind, actor_id);
        let ckey = counter_key(entity_id, kind);
        let record = InteractionRecord::new(entity_id, kind, actor_id);
        let record_bytes = rmp_serde::to_vec(&record)
            .map_err(|e| SyncError::Serialization(e.to_string()))?;

        let result: Result<(bool, i64), TransactionError<()>> =
            (&self.interactions, &self.counters).transaction(|(itx, ctx)| {
                let present = itx.get(key.as_bytes())?.is_some();
                let current = ctx
                    .get(ckey.as_bytes())?
                    .map(|v| decode_counter(&v))
                    .unwrap_or(0);

                if present {
                    itx.remove(key.as_bytes())?;
                    let next = current - 1;
                    ctx.insert(ckey.as_bytes(), encode_counter(next))?;
                    Ok((false, next))
                } else {
                    itx.insert(key.as_bytes(), record_bytes.as_slice())?;
                    let next = current + 1;
                    ctx.insert(ckey.as_bytes(), encode_counter(next))?;
                    Ok((true, next))
                }
            });

        let (present, counter) = result.map_err(|e| match e {
            TransactionError::Storage(e) => SyncError::Database(e),
            TransactionError::Abort(()) => SyncError::Internal("toggle aborted".into()),
        })?;

        debug!(
            entity = %entity_id,
            kind = %kind,
            actor = %actor_id,
            present = present,
            counter = counter,
            "Interaction toggled"
        );

        if present {
            self.events.emit(LedgerEvent::ToggledOn {
                entity_id: entity_id.to_string(),
                kind,
                actor_id: actor_id.to_string(),
                counter,
            });
        } else {
            self.events.emit(LedgerEvent::ToggledOff {
                entity_id: entity_id.to_string(),
                kind,
                actor_id: actor_id.to_string(),
                counter,
            });
        }

        Ok(present)
    }

    /// Append a child record for an append-only interaction.
    ///
    /// Generates a unique child id, writes the record and increments the
    /// counter in one transaction. Returns the child id.
    pub fn append_child(&self, record: InteractionRecord) -> Result<String, SyncError> {
        if record.kind.is_toggle() {
            return Err(SyncError::Internal(format!(
                "{} is a toggle kind, use toggle_interaction",
                record.kind
            )));
        }

        let child_id = uuid::Uuid::new_v4().to_string();
        let key = interaction_key(&record.entity_id, record.kind, &child_id);
        let ckey = counter_key(&record.entity_id, record.kind);
        let record_bytes = rmp_serde::to_vec(&record)
            .map_err(|e| SyncError::Serialization(e.to_string()))?;

        let result: Result<i64, TransactionError<()>> =
            (&self.interactions, &self.counters).transaction(|(itx, ctx)| {
                let current = ctx
                    .get(ckey.as_bytes())?
                    .map(|v| decode_counter(&v))
                    .unwrap_or(0);
                itx.insert(key.as_bytes(), record_bytes.as_slice())?;
                let next = current + 1;
                ctx.insert(ckey.as_bytes(), encode_counter(next))?;
                Ok(next)
            });

        let counter = result.map_err(|e| match e {
            TransactionError::Storage(e) => SyncError::Database(e),
            TransactionError::Abort(()) => SyncError::Internal("append aborted".into()),
        })?;

        debug!(
            entity = %record.entity_id,
            kind = %record.kind,
            actor = %record.actor_id,
            child = %child_id,
            counter = counter,
            "Child record appended"
        );

        self.events.emit(LedgerEvent::Appended {
            entity_id: record.entity_id.clone(),
            kind: record.kind,
            actor_id: record.actor_id.clone(),
            child_id: child_id.clone(),
            counter,
            preview: record.body.clone(),
        });

        Ok(child_id)
    }

    /// Atomically add a delta to a counter. Returns the new value.
    ///
    /// Uses sled's compare-and-swap update loop; concurrent increments from
    /// different actors never lose updates.
    pub fn increment_counter(
        &self,
        entity_id: &str,
        kind: InteractionKind,
        delta: i64,
    ) -> Result<i64, SyncError> {
        let ckey = counter_key(entity_id, kind);
        let new = self.counters.update_and_fetch(ckey.as_bytes(), |old| {
            let current = old.map(decode_counter).unwrap_or(0);
            Some(encode_counter(current + delta))
        })?;

        Ok(new.map(|v| decode_counter(&v)).unwrap_or(0))
    }

    // =========================================================================
    // Read Primitives
    // =========================================================================

    /// Whether the actor currently has the toggle interaction set.
    ///
    /// This is the one ledger read exposed to clients, for instant
    /// button-state rendering. Everything else reads the durable store.
    pub fn is_set(
        &self,
        entity_id: &str,
        kind: InteractionKind,
        actor_id: &str,
    ) -> Result<bool, SyncError> {
        let key = interaction_key(entity_id, kind, actor_id);
        Ok(self.interactions.contains_key(key.as_bytes())?)
    }

    /// Current counter value for an entity and kind
    pub fn counter(&self, entity_id: &str, kind: InteractionKind) -> Result<i64, SyncError> {
        let ckey = counter_key(entity_id, kind);
        Ok(self
            .counters
            .get(ckey.as_bytes())?
            .map(|v| decode_counter(&v))
            .unwrap_or(0))
    }

    /// Get a stored interaction record
    pub fn get_record(
        &self,
        entity_id: &str,
        kind: InteractionKind,
        suffix: &str,
    ) -> Result<Option<InteractionRecord>, SyncError> {
        let key = interaction_key(entity_id, kind, suffix);
        match self.interactions.get(key.as_bytes())? {
            Some(bytes) => {
                let record = rmp_serde::from_slice(&bytes)
                    .map_err(|e| SyncError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Remove all interactions and counters for an entity.
    ///
    /// Cascade path for entity deletion; best-effort, not transactional with
    /// the durable-store delete. Returns the number of records removed.
    pub fn purge_entity(&self, entity_id: &str) -> Result<usize, SyncError> {
        let prefix = format!("{}:", entity_id);
        let mut removed = 0usize;

        let mut batch = sled::Batch::default();
        for item in self.interactions.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item?;
            batch.remove(key);
            removed += 1;
        }
        self.interactions.apply_batch(batch)?;

        let mut batch = sled::Batch::default();
        for item in self.counters.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item?;
            batch.remove(key);
        }
        self.counters.apply_batch(batch)?;

        if removed > 0 {
            debug!(entity = %entity_id, removed = removed, "Purged ledger entries");
        }

        Ok(removed)
    }

    /// Flush changes to disk
    pub async fn flush(&self) -> Result<(), SyncError> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Ledger statistics
    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            interaction_count: self.interactions.len() as u64,
            counter_count: self.counters.len() as u64,
        }
    }
}

/// Ledger statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct LedgerStats {
    pub interaction_count: u64,
    pub counter_count: u64,
}
