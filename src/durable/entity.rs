//! Entity documents and counter mirroring
//!
//! Denormalized view of posts and users optimized for reads. The aggregate
//! counter fields mirror the fast ledger and are written exclusively by the
//! sync trigger engine with absolute values; clients and services edit the
//! content fields only. The two write paths patch disjoint fields, so
//! neither can lose the other's update.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::SyncError;
use crate::interaction::InteractionKind;

use super::{decode, encode, DurableStore};

/// Entity kinds stored in the durable store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Post,
    User,
}

/// Denormalized entity document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDoc {
    pub id: String,
    pub kind: EntityKind,

    /// Owner of the entity: the post author, or the user themselves.
    /// Notification recipients resolve through this field.
    pub author_id: String,

    /// Post body, or user bio
    #[serde(default)]
    pub body: String,

    /// Display name (users)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Push delivery token (users); absent means no push
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,

    // Mirrored aggregate counters, written only by the trigger engine
    #[serde(default)]
    pub amen_count: i64,
    #[serde(default)]
    pub lightbulb_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub repost_count: i64,
    #[serde(default)]
    pub follower_count: i64,

    /// Unix millis
    pub created_at: i64,
    pub updated_at: i64,

    /// Additional fields the engine must carry but never interprets
    #[serde(default)]
    pub extra: JsonValue,
}

impl EntityDoc {
    pub fn new_post(id: &str, author_id: &str, body: &str) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: id.to_string(),
            kind: EntityKind::Post,
            author_id: author_id.to_string(),
            body: body.to_string(),
            display_name: None,
            push_token: None,
            amen_count: 0,
            lightbulb_count: 0,
            comment_count: 0,
            repost_count: 0,
            follower_count: 0,
            created_at: now,
            updated_at: now,
            extra: JsonValue::Null,
        }
    }

    /// User entities own themselves; follows target them directly
    pub fn new_user(id: &str, display_name: &str) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: id.to_string(),
            kind: EntityKind::User,
            author_id: id.to_string(),
            body: String::new(),
            display_name: Some(display_name.to_string()),
            push_token: None,
            amen_count: 0,
            lightbulb_count: 0,
            comment_count: 0,
            repost_count: 0,
            follower_count: 0,
            created_at: now,
            updated_at: now,
            extra: JsonValue::Null,
        }
    }

    pub fn with_push_token(mut self, token: impl Into<String>) -> Self {
        self.push_token = Some(token.into());
        self
    }

    /// Mirrored counter field for an interaction kind
    pub fn counter(&self, kind: InteractionKind) -> i64 {
        match kind {
            InteractionKind::Amen => self.amen_count,
            InteractionKind::Lightbulb => self.lightbulb_count,
            InteractionKind::Comment => self.comment_count,
            InteractionKind::Repost => self.repost_count,
            InteractionKind::Follow => self.follower_count,
        }
    }

    fn set_counter(&mut self, kind: InteractionKind, value: i64) {
        match kind {
            InteractionKind::Amen => self.amen_count = value,
            InteractionKind::Lightbulb => self.lightbulb_count = value,
            InteractionKind::Comment => self.comment_count = value,
            InteractionKind::Repost => self.repost_count = value,
            InteractionKind::Follow => self.follower_count = value,
        }
    }
}

impl DurableStore {
    // =========================================================================
    // Entity Operations
    // =========================================================================

    /// Create or replace an entity document.
    ///
    /// Owner-initiated writes only; the sync path never goes through here.
    pub fn put_entity(&self, doc: EntityDoc) -> Result<(), SyncError> {
        let bytes = encode(&doc)?;
        self.entities.insert(doc.id.as_bytes(), bytes)?;
        self.cache_put(doc);
        Ok(())
    }

    /// Get an entity document (hot cache, then sled)
    pub fn get_entity(&self, id: &str) -> Result<Option<EntityDoc>, SyncError> {
        if let Some(cached) = self.cache.get(id) {
            return Ok(Some(cached.value().clone()));
        }

        match self.entities.get(id.as_bytes())? {
            Some(bytes) => {
                let doc: EntityDoc = decode(&bytes)?;
                self.cache_put(doc.clone());
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// Delete an entity document
    pub fn delete_entity(&self, id: &str) -> Result<bool, SyncError> {
        self.cache.remove(id);
        let existed = self.entities.remove(id.as_bytes())?.is_some();
        if existed {
            debug!(entity = %id, "Entity deleted");
        }
        Ok(existed)
    }

    /// Mirror an absolute counter value onto the entity document.
    ///
    /// Idempotent under redelivery: re-applying the same `(entity, value)`
    /// pair is a no-op in effect. Returns false when the entity no longer
    /// exists (deleted mid-flight; the next cleanup pass handles leftovers).
    pub fn sync_counter(
        &self,
        entity_id: &str,
        kind: InteractionKind,
        value: i64,
    ) -> Result<bool, SyncError> {
        let updated = Self::cas_update::<EntityDoc, _>(
            &self.entities,
            entity_id.as_bytes(),
            |doc| {
                doc.set_counter(kind, value);
                doc.updated_at = chrono::Utc::now().timestamp_millis();
            },
        )?;

        match updated {
            Some(doc) => {
                debug!(entity = %entity_id, kind = %kind, value = value, "Counter mirrored");
                self.cache_put(doc);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Merge-patch the body field of an entity.
    ///
    /// Content edits and counter syncs touch disjoint fields; neither can
    /// clobber the other.
    pub fn patch_body(&self, entity_id: &str, body: &str) -> Result<bool, SyncError> {
        let updated = Self::cas_update::<EntityDoc, _>(
            &self.entities,
            entity_id.as_bytes(),
            |doc| {
                doc.body = body.to_string();
                doc.updated_at = chrono::Utc::now().timestamp_millis();
            },
        )?;

        match updated {
            Some(doc) => {
                self.cache_put(doc);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Merge-patch a user's push token
    pub fn set_push_token(
        &self,
        user_id: &str,
        token: Option<String>,
    ) -> Result<bool, SyncError> {
        let updated = Self::cas_update::<EntityDoc, _>(
            &self.entities,
            user_id.as_bytes(),
            |doc| {
                doc.push_token = token.clone();
            },
        )?;

        match updated {
            Some(doc) => {
                self.cache_put(doc);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> DurableStore {
        DurableStore::open(dir.path().join("durable.sled"), 128)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_entity_crud() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .put_entity(EntityDoc::new_post("post-1", "user-2", "In the beginning"))
            .unwrap();

        let doc = store.get_entity("post-1").unwrap().unwrap();
        assert_eq!(doc.author_id, "user-2");
        assert_eq!(doc.amen_count, 0);

        assert!(store.delete_entity("post-1").unwrap());
        assert!(store.get_entity("post-1").unwrap().is_none());
        assert!(!store.delete_entity("post-1").unwrap());
    }

    #[tokio::test]
    async fn test_sync_counter_writes_absolute_value() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .put_entity(EntityDoc::new_post("post-1", "user-2", "text"))
            .unwrap();

        assert!(store
            .sync_counter("post-1", InteractionKind::Amen, 3)
            .unwrap());
        // Re-applying the same value changes nothing
        assert!(store
            .sync_counter("post-1", InteractionKind::Amen, 3)
            .unwrap());
        // A stale value followed by the current one converges
        assert!(store
            .sync_counter("post-1", InteractionKind::Amen, 2)
            .unwrap());
        assert!(store
            .sync_counter("post-1", InteractionKind::Amen, 4)
            .unwrap());

        let doc = store.get_entity("post-1").unwrap().unwrap();
        assert_eq!(doc.amen_count, 4);
        assert_eq!(doc.comment_count, 0);
    }

    #[tokio::test]
    async fn test_sync_counter_missing_entity() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        assert!(!store
            .sync_counter("ghost", InteractionKind::Amen, 1)
            .unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_counter_sync_does_not_clobber_body_edit() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(open_store(&dir).await);

        store
            .put_entity(EntityDoc::new_post("post-1", "user-2", "draft"))
            .unwrap();

        // Interleave counter syncs and body patches from separate tasks
        let counter_store = store.clone();
        let counters = tokio::spawn(async move {
            for i in 1..=50 {
                counter_store
                    .sync_counter("post-1", InteractionKind::Amen, i)
                    .unwrap();
            }
        });
        let body_store = store.clone();
        let bodies = tokio::spawn(async move {
            for i in 1..=50 {
                body_store
                    .patch_body("post-1", &format!("revision {}", i))
                    .unwrap();
            }
        });
        counters.await.unwrap();
        bodies.await.unwrap();

        let doc = store.get_entity("post-1").unwrap().unwrap();
        assert_eq!(doc.amen_count, 50);
        assert_eq!(doc.body, "revision 50");
    }

    #[tokio::test]
    async fn test_user_owns_itself() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .put_entity(EntityDoc::new_user("user-1", "Priscilla").with_push_token("tok-1"))
            .unwrap();

        let doc = store.get_entity("user-1").unwrap().unwrap();
        assert_eq!(doc.author_id, "user-1");
        assert_eq!(doc.display_name.as_deref(), Some("Priscilla"));
        assert_eq!(doc.push_token.as_deref(), Some("tok-1"));

        assert!(store.set_push_token("user-1", None).unwrap());
        let doc = store.get_entity("user-1").unwrap().unwrap();
        assert!(doc.push_token.is_none());
    }
}
