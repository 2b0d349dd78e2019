//! Interaction and notification kinds
//!
//! An interaction is one user's reaction to one entity. Toggle kinds (amen,
//! lightbulb, repost, follow) are binary and reversible: the presence of the
//! ledger record is the source of truth, and toggling twice is a no-op.
//! Append-only kinds (comment) accumulate distinct child records that are
//! never un-done in place.

use serde::{Deserialize, Serialize};

/// Interaction types recorded in the fast ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Amen,
    Lightbulb,
    Comment,
    Repost,
    Follow,
}

impl InteractionKind {
    /// Toggle kinds are presence-based and reversible
    pub fn is_toggle(&self) -> bool {
        !matches!(self, InteractionKind::Comment)
    }

    /// Ledger path segment / counter key segment
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Amen => "amen",
            InteractionKind::Lightbulb => "lightbulb",
            InteractionKind::Comment => "comment",
            InteractionKind::Repost => "repost",
            InteractionKind::Follow => "follow",
        }
    }

}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification kinds: every interaction kind plus mentions, which never
/// touch a ledger counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Amen,
    Lightbulb,
    Comment,
    Repost,
    Follow,
    Mention,
}

impl NotificationKind {
    /// Toggle-kind notifications dedup against an existing unread record;
    /// append-only kinds always create a fresh one.
    pub fn is_toggle(&self) -> bool {
        !matches!(self, NotificationKind::Comment | NotificationKind::Mention)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Amen => "amen",
            NotificationKind::Lightbulb => "lightbulb",
            NotificationKind::Comment => "comment",
            NotificationKind::Repost => "repost",
            NotificationKind::Follow => "follow",
            NotificationKind::Mention => "mention",
        }
    }
}

impl From<InteractionKind> for NotificationKind {
    fn from(kind: InteractionKind) -> Self {
        match kind {
            InteractionKind::Amen => NotificationKind::Amen,
            InteractionKind::Lightbulb => NotificationKind::Lightbulb,
            InteractionKind::Comment => NotificationKind::Comment,
            InteractionKind::Repost => NotificationKind::Repost,
            InteractionKind::Follow => NotificationKind::Follow,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user's reaction to one entity, stored in the fast ledger
///
/// For toggle kinds the ledger key is `{entity}:{kind}:{actor}` and the
/// record's existence is the toggle state. For append-only kinds the key is
/// `{entity}:{kind}:{child_id}` and records accumulate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub entity_id: String,
    pub kind: InteractionKind,
    pub actor_id: String,
    /// Unix millis, engine-assigned at write time
    pub created_at: i64,
    /// Body text for append-only kinds (comment content)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl InteractionRecord {
    pub fn new(entity_id: &str, kind: InteractionKind, actor_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            kind,
            actor_id: actor_id.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}
