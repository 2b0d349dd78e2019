//! Koinonia Sync - interaction count sync and notification fan-out engine
//!
//! Takes high-frequency, low-latency interaction writes (an amen, a
//! comment, a follow), mirrors their aggregate counters into a queryable
//! document store, and emits at most one notification record plus at most
//! one push message per qualifying event.
//!
//! ## Architecture
//!
//! ```text
//! Client ──► FastLedger (atomic toggle/append + counter, sled)
//!                │ one event per committed write
//!                ▼
//!            EventBus (broadcast)
//!                │
//!                ▼
//!          TriggerEngine ──┬─► DurableStore: absolute-value counter merge
//!                          └─► FanOutService ──► NotificationRecord
//!                                              └─► PushGateway (best effort)
//! ```
//!
//! ## Why two stores?
//!
//! | Concern | Store |
//! |---------|-------|
//! | Atomic counter math, toggle state | Fast ledger |
//! | Queries, inbox, preferences | Durable store |
//!
//! The ledger owns counter authority; the durable store only ever receives
//! absolute values. Redelivered or reordered sync events can produce a
//! stale mirror, never a corrupted one, and the next write re-asserts the
//! truth. No lock service required.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/koinonia-sync/
//! ├── ledger.sled/           # interactions + counters
//! ├── durable.sled/          # entities, notifications, dedup index, preferences
//! └── config.toml            # Configuration
//! ```

pub mod cleanup;
pub mod config;
pub mod durable;
pub mod error;
pub mod events;
pub mod fanout;
pub mod interaction;
pub mod ledger;
pub mod push;
pub mod retry;
pub mod service;
pub mod trigger;

// Re-exports
pub use cleanup::{spawn_cleanup_task, sweep_orphans};
pub use config::Config;
pub use durable::{DeliveryPreference, DurableStore, EntityDoc, EntityKind, NotificationRecord};
pub use error::SyncError;
pub use events::{EventBus, LedgerEvent};
pub use fanout::{FanOutService, NotificationEvent};
pub use interaction::{InteractionKind, InteractionRecord, NotificationKind};
pub use ledger::FastLedger;
pub use push::{DeliveryError, LogOnlyGateway, PushGateway};
pub use service::{InteractionService, Services};
pub use trigger::spawn_trigger_engine;
