//! Notification records and the inbox
//!
//! Records are keyed `{recipient}:{id}` so one prefix scan serves a user's
//! inbox. A secondary index tree maps the dedup tuple
//! `{recipient}:{actor}:{entity}:{kind}` to the id of the current unread
//! toggle-kind record; marking a record read releases its index slot so the
//! next toggle-on creates a fresh notification.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SyncError;
use crate::interaction::NotificationKind;

use super::{decode, encode, DurableStore};

/// Persisted notification record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub recipient_id: String,
    pub actor_id: String,
    pub kind: NotificationKind,
    pub entity_id: String,
    #[serde(default)]
    pub is_read: bool,
    /// Unix millis
    pub created_at: i64,
}

impl NotificationRecord {
    pub fn new(
        recipient_id: &str,
        actor_id: &str,
        kind: NotificationKind,
        entity_id: &str,
        created_at: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            recipient_id: recipient_id.to_string(),
            actor_id: actor_id.to_string(),
            kind,
            entity_id: entity_id.to_string(),
            is_read: false,
            created_at,
        }
    }

    fn storage_key(&self) -> String {
        notification_key(&self.recipient_id, &self.id)
    }

    fn index_key(&self) -> String {
        dedup_key(
            &self.recipient_id,
            &self.actor_id,
            &self.entity_id,
            self.kind,
        )
    }
}

fn notification_key(recipient_id: &str, id: &str) -> String {
    format!("{}:{}", recipient_id, id)
}

fn dedup_key(recipient_id: &str, actor_id: &str, entity_id: &str, kind: NotificationKind) -> String {
    format!(
        "{}:{}:{}:{}",
        recipient_id,
        actor_id,
        entity_id,
        kind.as_str()
    )
}

impl DurableStore {
    // =========================================================================
    // Notification Operations
    // =========================================================================

    /// Persist a notification record.
    ///
    /// Toggle kinds register themselves in the dedup index so a later
    /// un-then-re-toggle refreshes this record instead of creating another.
    pub fn insert_notification(&self, record: &NotificationRecord) -> Result<(), SyncError> {
        let bytes = encode(record)?;
        self.notifications
            .insert(record.storage_key().as_bytes(), bytes)?;

        if record.kind.is_toggle() {
            self.notif_index
                .insert(record.index_key().as_bytes(), record.id.as_bytes())?;
        }

        debug!(
            recipient = %record.recipient_id,
            actor = %record.actor_id,
            kind = %record.kind,
            entity = %record.entity_id,
            "Notification recorded"
        );
        Ok(())
    }

    /// Find the unread toggle-kind record for a dedup tuple, if any.
    ///
    /// Stale index entries (record deleted, or already read) are cleared on
    /// the way through.
    pub fn find_unread(
        &self,
        recipient_id: &str,
        actor_id: &str,
        entity_id: &str,
        kind: NotificationKind,
    ) -> Result<Option<NotificationRecord>, SyncError> {
        let ikey = dedup_key(recipient_id, actor_id, entity_id, kind);
        let id = match self.notif_index.get(ikey.as_bytes())? {
            Some(bytes) => String::from_utf8_lossy(&bytes).to_string(),
            None => return Ok(None),
        };

        let nkey = notification_key(recipient_id, &id);
        match self.notifications.get(nkey.as_bytes())? {
            Some(bytes) => {
                let record: NotificationRecord = decode(&bytes)?;
                if record.is_read {
                    self.notif_index.remove(ikey.as_bytes())?;
                    Ok(None)
                } else {
                    Ok(Some(record))
                }
            }
            None => {
                self.notif_index.remove(ikey.as_bytes())?;
                Ok(None)
            }
        }
    }

    /// Refresh an existing record's timestamp (dedup hit).
    ///
    /// The record stays unread; only `created_at` moves forward.
    pub fn refresh_notification(
        &self,
        recipient_id: &str,
        id: &str,
        created_at: i64,
    ) -> Result<bool, SyncError> {
        let key = notification_key(recipient_id, id);
        let updated = Self::cas_update::<NotificationRecord, _>(
            &self.notifications,
            key.as_bytes(),
            |record| {
                record.created_at = created_at;
            },
        )?;
        Ok(updated.is_some())
    }

    /// Mark a notification read, releasing its dedup slot
    pub fn mark_read(&self, recipient_id: &str, id: &str) -> Result<bool, SyncError> {
        let key = notification_key(recipient_id, id);
        let updated = Self::cas_update::<NotificationRecord, _>(
            &self.notifications,
            key.as_bytes(),
            |record| {
                record.is_read = true;
            },
        )?;

        let record = match updated {
            Some(record) => record,
            None => return Ok(false),
        };

        self.release_index_slot(&record)?;
        Ok(true)
    }

    /// Mark all of a recipient's notifications read. Returns how many flipped.
    pub fn mark_all_read(&self, recipient_id: &str) -> Result<usize, SyncError> {
        let prefix = format!("{}:", recipient_id);
        let mut flipped = 0usize;

        for item in self.notifications.scan_prefix(prefix.as_bytes()) {
            let (key, bytes) = item?;
            let record: NotificationRecord = decode(&bytes)?;
            if record.is_read {
                continue;
            }
            let updated = Self::cas_update::<NotificationRecord, _>(
                &self.notifications,
                &key,
                |record| {
                    record.is_read = true;
                },
            )?;
            if let Some(record) = updated {
                self.release_index_slot(&record)?;
                flipped += 1;
            }
        }

        Ok(flipped)
    }

    /// List a recipient's notifications: unread first, newest first within
    /// each group
    pub fn list_notifications(
        &self,
        recipient_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, SyncError> {
        let prefix = format!("{}:", recipient_id);
        let mut records = Vec::new();

        for item in self.notifications.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = item?;
            records.push(decode::<NotificationRecord>(&bytes)?);
        }

        records.sort_by(|a, b| {
            a.is_read
                .cmp(&b.is_read)
                .then(b.created_at.cmp(&a.created_at))
        });
        records.truncate(limit);
        Ok(records)
    }

    /// Count a recipient's unread notifications
    pub fn unread_count(&self, recipient_id: &str) -> Result<u64, SyncError> {
        let prefix = format!("{}:", recipient_id);
        let mut count = 0u64;

        for item in self.notifications.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = item?;
            let record: NotificationRecord = decode(&bytes)?;
            if !record.is_read {
                count += 1;
            }
        }

        Ok(count)
    }

    /// Delete a single notification
    pub fn delete_notification(&self, recipient_id: &str, id: &str) -> Result<bool, SyncError> {
        let key = notification_key(recipient_id, id);
        let removed = self.notifications.remove(key.as_bytes())?;

        if let Some(bytes) = removed {
            let record: NotificationRecord = decode(&bytes)?;
            self.release_index_slot(&record)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Delete every notification referencing an entity (cascade path).
    ///
    /// Full scan; runs on entity deletion and during cleanup sweeps, not on
    /// any hot path.
    pub fn delete_notifications_for_entity(&self, entity_id: &str) -> Result<usize, SyncError> {
        let mut removed = 0usize;

        for item in self.notifications.iter() {
            let (key, bytes) = item?;
            let record: NotificationRecord = decode(&bytes)?;
            if record.entity_id != entity_id {
                continue;
            }
            self.notifications.remove(&key)?;
            self.release_index_slot(&record)?;
            removed += 1;
        }

        if removed > 0 {
            debug!(entity = %entity_id, removed = removed, "Cascaded notification delete");
        }
        Ok(removed)
    }

    /// Snapshot of every notification record, for the cleanup sweep
    pub(crate) fn all_notifications(&self) -> Result<Vec<NotificationRecord>, SyncError> {
        let mut records = Vec::new();
        for item in self.notifications.iter() {
            let (_, bytes) = item?;
            records.push(decode::<NotificationRecord>(&bytes)?);
        }
        Ok(records)
    }

    /// Remove the dedup index entry for a record, but only if the slot still
    /// points at it (a newer record may have taken the tuple over).
    fn release_index_slot(&self, record: &NotificationRecord) -> Result<(), SyncError> {
        if !record.kind.is_toggle() {
            return Ok(());
        }
        let ikey = record.index_key();
        if let Some(current) = self.notif_index.get(ikey.as_bytes())? {
            if current.as_ref() == record.id.as_bytes() {
                self.notif_index.remove(ikey.as_bytes())?;
            }
        }
        Ok(())
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

    fn amen_record(ts: i64) -> NotificationRecord {
        NotificationRecord::new("user-2", "user-1", NotificationKind::Amen, "post-1", ts)
    }

    #[tokio::test]
    async fn test_insert_and_find_unread() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let record = amen_record(1_000);
        store.insert_notification(&record).unwrap();

        let found = store
            .find_unread("user-2", "user-1", "post-1", NotificationKind::Amen)
            .unwrap()
            .unwrap();
        assert_eq!(found.id, record.id);
        assert!(!found.is_read);

        // Different actor misses the index
        assert!(store
            .find_unread("user-2", "user-3", "post-1", NotificationKind::Amen)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_mark_read_releases_dedup_slot() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let record = amen_record(1_000);
        store.insert_notification(&record).unwrap();
        assert!(store.mark_read("user-2", &record.id).unwrap());

        // Read record no longer dedups
        assert!(store
            .find_unread("user-2", "user-1", "post-1", NotificationKind::Amen)
            .unwrap()
            .is_none());

        let listed = store.list_notifications("user-2", 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_read);
    }

    #[tokio::test]
    async fn test_refresh_keeps_single_record() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let record = amen_record(1_000);
        store.insert_notification(&record).unwrap();
        assert!(store
            .refresh_notification("user-2", &record.id, 2_000)
            .unwrap());

        let listed = store.list_notifications("user-2", 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].created_at, 2_000);
        assert!(!listed[0].is_read);
    }

    #[tokio::test]
    async fn test_append_only_kinds_skip_index() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let record = NotificationRecord::new(
            "user-2",
            "user-1",
            NotificationKind::Comment,
            "post-1",
            1_000,
        );
        store.insert_notification(&record).unwrap();

        assert!(store
            .find_unread("user-2", "user-1", "post-1", NotificationKind::Comment)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_orders_unread_first_then_newest() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let old_unread = NotificationRecord::new(
            "user-2",
            "user-1",
            NotificationKind::Comment,
            "post-1",
            1_000,
        );
        let new_unread = NotificationRecord::new(
            "user-2",
            "user-3",
            NotificationKind::Comment,
            "post-1",
            3_000,
        );
        let read = {
            let mut r = NotificationRecord::new(
                "user-2",
                "user-4",
                NotificationKind::Comment,
                "post-1",
                5_000,
            );
            r.is_read = true;
            r
        };
        store.insert_notification(&old_unread).unwrap();
        store.insert_notification(&new_unread).unwrap();
        store.insert_notification(&read).unwrap();

        let listed = store.list_notifications("user-2", 10).unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].id, new_unread.id);
        assert_eq!(listed[1].id, old_unread.id);
        assert_eq!(listed[2].id, read.id);

        assert_eq!(store.unread_count("user-2").unwrap(), 2);

        assert_eq!(store.mark_all_read("user-2").unwrap(), 2);
        assert_eq!(store.unread_count("user-2").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cascade_delete_for_entity() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store.insert_notification(&amen_record(1_000)).unwrap();
        store
            .insert_notification(&NotificationRecord::new(
                "user-2",
                "user-3",
                NotificationKind::Comment,
                "post-1",
                2_000,
            ))
            .unwrap();
        store
            .insert_notification(&NotificationRecord::new(
                "user-2",
                "user-1",
                NotificationKind::Amen,
                "post-9",
                3_000,
            ))
            .unwrap();

        assert_eq!(store.delete_notifications_for_entity("post-1").unwrap(), 2);

        let listed = store.list_notifications("user-2", 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].entity_id, "post-9");
        // Index slot for the surviving entity remains usable
        assert!(store
            .find_unread("user-2", "user-1", "post-9", NotificationKind::Amen)
            .unwrap()
            .is_some());
    }
}
