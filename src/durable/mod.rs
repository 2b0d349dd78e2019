//! Durable store - queryable document store
//!
//! Holds the denormalized entity documents, notification records, and
//! delivery preferences that back all read/query paths. Mirrored counter
//! fields on entity documents are written only by the sync trigger engine,
//! always as absolute values.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      DurableStore                        │
//! ├─────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐    ┌──────────────────────────┐   │
//! │  │   Hot cache      │◄───│    sled trees            │   │
//! │  │   (DashMap)      │    │                          │   │
//! │  │   entity reads   │    │  - entities              │   │
//! │  └──────────────────┘    │  - notifications         │   │
//! │                          │  - notif_index (dedup)   │   │
//! │                          │  - preferences           │   │
//! │                          └──────────────────────────┘   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Merge patches
//!
//! Every mutation of an existing document is a field-addressed merge patch
//! executed as a compare-and-swap loop: load, mutate the named field,
//! reserialize, swap against the loaded bytes. A concurrent edit to an
//! unrelated field retries instead of being clobbered; a whole-document
//! replace never happens on the sync path.

pub mod entity;
pub mod notification;
pub mod preference;

pub use entity::{EntityDoc, EntityKind};
pub use notification::NotificationRecord;
pub use preference::DeliveryPreference;

use std::path::Path;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::error::SyncError;

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, SyncError> {
    rmp_serde::to_vec_named(value).map_err(|e| SyncError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SyncError> {
    rmp_serde::from_slice(bytes).map_err(|e| SyncError::Serialization(e.to_string()))
}

/// Durable document store backed by sled
pub struct DurableStore {
    db: sled::Db,
    pub(crate) entities: sled::Tree,
    pub(crate) notifications: sled::Tree,
    /// Dedup index: `{recipient}:{actor}:{entity}:{kind}` -> notification id
    pub(crate) notif_index: sled::Tree,
    pub(crate) preferences: sled::Tree,
    pub(crate) cache: DashMap<String, EntityDoc>,
    cache_capacity: usize,
}

impl DurableStore {
    /// Open or create the durable store
    pub async fn open(
        path: impl AsRef<Path>,
        cache_capacity: usize,
    ) -> Result<Self, SyncError> {
        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = sled::open(path.as_ref())?;
        let entities = db.open_tree("entities")?;
        let notifications = db.open_tree("notifications")?;
        let notif_index = db.open_tree("notif_index")?;
        let preferences = db.open_tree("preferences")?;

        info!(path = %path.as_ref().display(), "Durable store opened");

        Ok(Self {
            db,
            entities,
            notifications,
            notif_index,
            preferences,
            cache: DashMap::new(),
            cache_capacity,
        })
    }

    /// Cache a freshly-read or freshly-written entity document.
    ///
    /// Eviction is coarse: when the cache fills, drop it entirely and let
    /// reads repopulate.
    pub(crate) fn cache_put(&self, doc: EntityDoc) {
        if self.cache.len() >= self.cache_capacity {
            self.cache.clear();
        }
        self.cache.insert(doc.id.clone(), doc);
    }

    /// Merge-patch a document in place via a compare-and-swap loop.
    ///
    /// Returns `None` when the key does not exist. The mutator only touches
    /// the fields it owns; concurrent writers to other fields retry rather
    /// than overwrite each other.
    pub(crate) fn cas_update<T, F>(
        tree: &sled::Tree,
        key: &[u8],
        mut mutate: F,
    ) -> Result<Option<T>, SyncError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(&mut T),
    {
        loop {
            let old = match tree.get(key)? {
                Some(bytes) => bytes,
                None => return Ok(None),
            };
            let mut doc: T = decode(&old)?;
            mutate(&mut doc);
            let new = encode(&doc)?;

            match tree.compare_and_swap(key, Some(&old), Some(new))? {
                Ok(()) => return Ok(Some(doc)),
                // Lost the race; reload and re-apply
                Err(_) => continue,
            }
        }
    }

    /// Flush changes to disk
    pub async fn flush(&self) -> Result<(), SyncError> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Store statistics
    pub fn stats(&self) -> DurableStats {
        DurableStats {
            entity_count: self.entities.len() as u64,
            notification_count: self.notifications.len() as u64,
            preference_count: self.preferences.len() as u64,
        }
    }
}

/// Durable store statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DurableStats {
    pub entity_count: u64,
    pub notification_count: u64,
    pub preference_count: u64,
}
