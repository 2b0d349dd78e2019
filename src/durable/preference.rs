//! Per-recipient delivery preferences
//!
//! One boolean per notification kind, all defaulting to true. Owned by the
//! recipient; the fan-out service only ever reads them.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::interaction::NotificationKind;

use super::{decode, encode, DurableStore};

fn default_true() -> bool {
    true
}

/// Delivery preferences for one recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPreference {
    #[serde(default = "default_true")]
    pub notify_on_amen: bool,
    #[serde(default = "default_true")]
    pub notify_on_lightbulb: bool,
    #[serde(default = "default_true")]
    pub notify_on_comment: bool,
    #[serde(default = "default_true")]
    pub notify_on_repost: bool,
    #[serde(default = "default_true")]
    pub notify_on_follow: bool,
    #[serde(default = "default_true")]
    pub notify_on_mention: bool,
}

impl Default for DeliveryPreference {
    fn default() -> Self {
        Self {
            notify_on_amen: true,
            notify_on_lightbulb: true,
            notify_on_comment: true,
            notify_on_repost: true,
            notify_on_follow: true,
            notify_on_mention: true,
        }
    }
}

impl DeliveryPreference {
    pub fn allows(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Amen => self.notify_on_amen,
            NotificationKind::Lightbulb => self.notify_on_lightbulb,
            NotificationKind::Comment => self.notify_on_comment,
            NotificationKind::Repost => self.notify_on_repost,
            NotificationKind::Follow => self.notify_on_follow,
            NotificationKind::Mention => self.notify_on_mention,
        }
    }

    pub fn with_kind(mut self, kind: NotificationKind, enabled: bool) -> Self {
        match kind {
            NotificationKind::Amen => self.notify_on_amen = enabled,
            NotificationKind::Lightbulb => self.notify_on_lightbulb = enabled,
            NotificationKind::Comment => self.notify_on_comment = enabled,
            NotificationKind::Repost => self.notify_on_repost = enabled,
            NotificationKind::Follow => self.notify_on_follow = enabled,
            NotificationKind::Mention => self.notify_on_mention = enabled,
        }
        self
    }
}

impl DurableStore {
    // =========================================================================
    // Preference Operations
    // =========================================================================

    /// Get a user's delivery preferences; absent means everything enabled
    pub fn preferences(&self, user_id: &str) -> Result<DeliveryPreference, SyncError> {
        match self.preferences.get(user_id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Ok(DeliveryPreference::default()),
        }
    }

    /// Replace a user's delivery preferences
    pub fn set_preferences(
        &self,
        user_id: &str,
        prefs: &DeliveryPreference,
    ) -> Result<(), SyncError> {
        let bytes = encode(prefs)?;
        self.preferences.insert(user_id.as_bytes(), bytes)?;
        Ok(())
    }
}
