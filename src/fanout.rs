//! Notification fan-out
//!
//! Converts one triggering interaction into at most one persisted
//! notification record and at most one push attempt:
//!
//! 1. Resolve the recipient (entity owner, unless the event pre-resolved
//!    one, as mentions do)
//! 2. Drop self-interactions
//! 3. Drop kinds the recipient has disabled
//! 4. Toggle kinds refresh an existing unread record for the same
//!    `(recipient, actor, entity, kind)` tuple instead of creating another
//! 5. Persist the record
//! 6. Best-effort push: one retry on transient failure, then give up
//!
//! Push delivery is an add-on. It never gates record persistence, and its
//! failures never propagate past this module.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::Config;
use crate::durable::{DurableStore, NotificationRecord};
use crate::error::SyncError;
use crate::interaction::NotificationKind;
use crate::push::PushGateway;

/// Transient input to the fan-out service; consumed, never stored
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    /// Pre-resolved recipient. `None` resolves to the entity owner.
    pub recipient_id: Option<String>,
    pub actor_id: String,
    pub entity_id: String,
    pub kind: NotificationKind,
    /// Unix millis
    pub created_at: i64,
    /// Content excerpt for the push payload
    pub preview: Option<String>,
}

impl NotificationEvent {
    /// Event whose recipient is the entity owner
    pub fn for_entity_owner(
        entity_id: &str,
        kind: NotificationKind,
        actor_id: &str,
        preview: Option<String>,
    ) -> Self {
        Self {
            recipient_id: None,
            actor_id: actor_id.to_string(),
            entity_id: entity_id.to_string(),
            kind,
            created_at: chrono::Utc::now().timestamp_millis(),
            preview,
        }
    }

    /// Mention event targeting an explicit user
    pub fn mention(
        recipient_id: &str,
        actor_id: &str,
        entity_id: &str,
        preview: Option<String>,
    ) -> Self {
        Self {
            recipient_id: Some(recipient_id.to_string()),
            actor_id: actor_id.to_string(),
            entity_id: entity_id.to_string(),
            kind: NotificationKind::Mention,
            created_at: chrono::Utc::now().timestamp_millis(),
            preview,
        }
    }
}

/// Notification fan-out service
pub struct FanOutService {
    durable: Arc<DurableStore>,
    gateway: Arc<dyn PushGateway>,
    push_timeout: Duration,
    preview_max_chars: usize,
}

impl FanOutService {
    pub fn new(durable: Arc<DurableStore>, gateway: Arc<dyn PushGateway>, config: &Config) -> Self {
        Self {
            durable,
            gateway,
            push_timeout: config.push_timeout(),
            preview_max_chars: config.preview_max_chars,
        }
    }

    /// Process one notification event.
    ///
    /// Returns the persisted (or refreshed) record, or `None` when the event
    /// was suppressed. Suppression is not an error.
    pub async fn dispatch(
        &self,
        event: NotificationEvent,
    ) -> Result<Option<NotificationRecord>, SyncError> {
        // 1. Resolve recipient
        let recipient_id = match &event.recipient_id {
            Some(id) => id.clone(),
            None => match self.durable.get_entity(&event.entity_id)? {
                Some(doc) => doc.author_id,
                None => {
                    warn!(entity = %event.entity_id, kind = %event.kind, "Dropping event for missing entity");
                    return Ok(None);
                }
            },
        };

        // 2. No self-notification
        if recipient_id == event.actor_id {
            debug!(actor = %event.actor_id, entity = %event.entity_id, "Self-interaction suppressed");
            return Ok(None);
        }

        // 3. Recipient preference
        let prefs = self.durable.preferences(&recipient_id)?;
        if !prefs.allows(event.kind) {
            debug!(recipient = %recipient_id, kind = %event.kind, "Suppressed by preference");
            return Ok(None);
        }

        // 4. Dedup for toggle kinds: refresh the unread record in place.
        //    No push on the refresh path; the recipient already has an
        //    unread notification for this tuple.
        if event.kind.is_toggle() {
            if let Some(existing) = self.durable.find_unread(
                &recipient_id,
                &event.actor_id,
                &event.entity_id,
                event.kind,
            )? {
                // A record deleted between lookup and refresh falls through
                // to the create path
                if self
                    .durable
                    .refresh_notification(&recipient_id, &existing.id, event.created_at)?
                {
                    debug!(
                        recipient = %recipient_id,
                        actor = %event.actor_id,
                        kind = %event.kind,
                        "Refreshed existing unread notification"
                    );
                    return Ok(Some(NotificationRecord {
                        created_at: event.created_at,
                        ..existing
                    }));
                }
            }
        }

        // 5. Persist
        let record = NotificationRecord::new(
            &recipient_id,
            &event.actor_id,
            event.kind,
            &event.entity_id,
            event.created_at,
        );
        self.durable.insert_notification(&record)?;

        // 6. Best-effort push
        self.attempt_push(&record, event.preview.as_deref()).await;

        Ok(Some(record))
    }

    /// Try to deliver a push for a freshly-created record.
    ///
    /// Never returns an error: failures are logged and swallowed, the in-app
    /// record already exists.
    async fn attempt_push(&self, record: &NotificationRecord, preview: Option<&str>) {
        let token = match self.durable.get_entity(&record.recipient_id) {
            Ok(Some(user)) => match user.push_token {
                Some(token) => token,
                None => {
                    debug!(recipient = %record.recipient_id, "No push token, skipping push");
                    return;
                }
            },
            Ok(None) => {
                debug!(recipient = %record.recipient_id, "No recipient document, skipping push");
                return;
            }
            Err(e) => {
                warn!(recipient = %record.recipient_id, error = %e, "Token lookup failed, skipping push");
                return;
            }
        };

        let actor_name = self
            .durable
            .get_entity(&record.actor_id)
            .ok()
            .flatten()
            .and_then(|doc| doc.display_name)
            .unwrap_or_else(|| "Someone".to_string());

        let title = push_title(record.kind, &actor_name);
        let body = preview
            .map(|p| truncate_preview(p, self.preview_max_chars))
            .unwrap_or_default();

        let mut data = HashMap::new();
        data.insert("entity_id".to_string(), record.entity_id.clone());
        data.insert("actor_id".to_string(), record.actor_id.clone());
        data.insert("kind".to_string(), record.kind.as_str().to_string());

        // One retry on transient failure; a sustained outage must not turn
        // into a delivery storm.
        for attempt in 0..2u32 {
            match timeout(self.push_timeout, self.gateway.send(&token, &title, &body, &data)).await
            {
                Ok(Ok(())) => {
                    debug!(recipient = %record.recipient_id, kind = %record.kind, "Push delivered");
                    return;
                }
                Ok(Err(e)) if e.is_transient() && attempt == 0 => {
                    warn!(recipient = %record.recipient_id, error = %e, "Push failed, retrying once");
                }
                Ok(Err(e)) => {
                    warn!(recipient = %record.recipient_id, error = %e, "Push failed, giving up");
                    return;
                }
                Err(_) if attempt == 0 => {
                    warn!(recipient = %record.recipient_id, "Push timed out, retrying once");
                }
                Err(_) => {
                    warn!(recipient = %record.recipient_id, "Push timed out, giving up");
                    return;
                }
            }
        }
    }
}

fn push_title(kind: NotificationKind, actor_name: &str) -> String {
    match kind {
        NotificationKind::Amen => format!("{} said Amen", actor_name),
        NotificationKind::Lightbulb => format!("{} left a lightbulb", actor_name),
        NotificationKind::Comment => format!("{} commented", actor_name),
        NotificationKind::Repost => format!("{} reposted your post", actor_name),
        NotificationKind::Follow => format!("{} followed you", actor_name),
        NotificationKind::Mention => format!("{} mentioned you", actor_name),
    }
}

/// Truncate a content preview at a character boundary
fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::{DeliveryPreference, EntityDoc};
    use crate::push::testing::RecordingGateway;
    use tempfile::TempDir;

    struct Fixture {
        durable: Arc<DurableStore>,
        gateway: Arc<RecordingGateway>,
        fanout: FanOutService,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let durable = Arc::new(
            DurableStore::open(dir.path().join("durable.sled"), 128)
                .await
                .unwrap(),
        );
        let gateway = Arc::new(RecordingGateway::new());
        let fanout = FanOutService::new(durable.clone(), gateway.clone(), &Config::default());

        // Post P1 owned by U2; U1 and U2 are users with tokens
        durable
            .put_entity(EntityDoc::new_user("user-1", "Priscilla").with_push_token("tok-1"))
            .unwrap();
        durable
            .put_entity(EntityDoc::new_user("user-2", "Aquila").with_push_token("tok-2"))
            .unwrap();
        durable
            .put_entity(EntityDoc::new_post("post-1", "user-2", "Grace and peace to you"))
            .unwrap();

        Fixture {
            durable,
            gateway,
            fanout,
            _dir: dir,
        }
    }

    fn amen_event(actor: &str) -> NotificationEvent {
        NotificationEvent::for_entity_owner("post-1", NotificationKind::Amen, actor, None)
    }

    #[tokio::test]
    async fn test_creates_record_and_pushes() {
        let f = fixture().await;

        let record = f.fanout.dispatch(amen_event("user-1")).await.unwrap().unwrap();
        assert_eq!(record.recipient_id, "user-2");
        assert_eq!(record.actor_id, "user-1");
        assert!(!record.is_read);

        assert_eq!(f.gateway.sent_count(), 1);
        let sent = f.gateway.sent.lock().unwrap()[0].clone();
        assert_eq!(sent.token, "tok-2");
        assert!(sent.title.contains("Priscilla"));
        assert_eq!(sent.data.get("entity_id").unwrap(), "post-1");
    }

    #[tokio::test]
    async fn test_no_self_notification() {
        let f = fixture().await;

        let result = f.fanout.dispatch(amen_event("user-2")).await.unwrap();
        assert!(result.is_none());
        assert_eq!(f.durable.list_notifications("user-2", 10).unwrap().len(), 0);
        assert_eq!(f.gateway.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_preference_suppression() {
        let f = fixture().await;

        let prefs = DeliveryPreference::default().with_kind(NotificationKind::Amen, false);
        f.durable.set_preferences("user-2", &prefs).unwrap();

        let result = f.fanout.dispatch(amen_event("user-1")).await.unwrap();
        assert!(result.is_none());
        assert_eq!(f.durable.list_notifications("user-2", 10).unwrap().len(), 0);
        assert_eq!(f.gateway.sent_count(), 0);

        // Other kinds still flow
        let comment = NotificationEvent::for_entity_owner(
            "post-1",
            NotificationKind::Comment,
            "user-1",
            Some("test".into()),
        );
        assert!(f.fanout.dispatch(comment).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_toggle_dedup_refreshes_single_record() {
        let f = fixture().await;

        let first = f.fanout.dispatch(amen_event("user-1")).await.unwrap().unwrap();
        // Re-amen after an un-amen: same tuple again
        let mut second_event = amen_event("user-1");
        second_event.created_at = first.created_at + 5_000;
        let second = f.fanout.dispatch(second_event).await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        let listed = f.durable.list_notifications("user-2", 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].created_at, first.created_at + 5_000);
        assert!(!listed[0].is_read);

        // Refresh path does not push again
        assert_eq!(f.gateway.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_read_record_does_not_dedup() {
        let f = fixture().await;

        let first = f.fanout.dispatch(amen_event("user-1")).await.unwrap().unwrap();
        f.durable.mark_read("user-2", &first.id).unwrap();

        let second = f.fanout.dispatch(amen_event("user-1")).await.unwrap().unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(f.durable.list_notifications("user-2", 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_append_only_kinds_create_distinct_records() {
        let f = fixture().await;

        for body in ["first comment", "second comment"] {
            let event = NotificationEvent::for_entity_owner(
                "post-1",
                NotificationKind::Comment,
                "user-1",
                Some(body.into()),
            );
            f.fanout.dispatch(event).await.unwrap().unwrap();
        }

        assert_eq!(f.durable.list_notifications("user-2", 10).unwrap().len(), 2);
        assert_eq!(f.gateway.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_entity_dropped_silently() {
        let f = fixture().await;

        let event =
            NotificationEvent::for_entity_owner("ghost", NotificationKind::Amen, "user-1", None);
        assert!(f.fanout.dispatch(event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mention_targets_explicit_recipient() {
        let f = fixture().await;

        let event = NotificationEvent::mention("user-1", "user-2", "post-1", Some("see this".into()));
        let record = f.fanout.dispatch(event).await.unwrap().unwrap();
        assert_eq!(record.recipient_id, "user-1");
        assert_eq!(record.kind, NotificationKind::Mention);

        let sent = f.gateway.sent.lock().unwrap()[0].clone();
        assert_eq!(sent.token, "tok-1");
        assert!(sent.title.contains("Aquila"));
    }

    #[tokio::test]
    async fn test_missing_display_name_falls_back() {
        let f = fixture().await;

        // Actor with no user document at all
        let event =
            NotificationEvent::for_entity_owner("post-1", NotificationKind::Amen, "stranger", None);
        f.fanout.dispatch(event).await.unwrap().unwrap();

        let sent = f.gateway.sent.lock().unwrap()[0].clone();
        assert!(sent.title.contains("Someone"));
    }

    #[tokio::test]
    async fn test_transient_push_failure_retried_once() {
        let f = fixture().await;
        f.gateway.fail_next(1);

        let record = f.fanout.dispatch(amen_event("user-1")).await.unwrap();
        assert!(record.is_some());
        assert_eq!(f.gateway.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_sustained_push_failure_gives_up_but_record_persists() {
        let f = fixture().await;
        f.gateway.fail_next(5);

        let record = f.fanout.dispatch(amen_event("user-1")).await.unwrap();
        assert!(record.is_some());
        assert_eq!(f.gateway.sent_count(), 0);
        assert_eq!(f.durable.list_notifications("user-2", 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_push_token_skips_push() {
        let f = fixture().await;
        f.durable.set_push_token("user-2", None).unwrap();

        let record = f.fanout.dispatch(amen_event("user-1")).await.unwrap();
        assert!(record.is_some());
        assert_eq!(f.gateway.sent_count(), 0);
    }

    #[test]
    fn test_truncate_preview() {
        let long: String = "a".repeat(300);
        let out = truncate_preview(&long, 100);
        assert_eq!(out.chars().count(), 101);
        assert!(out.ends_with('…'));

        assert_eq!(truncate_preview("short", 100), "short");
    }
}
