//! Push delivery gateway interface
//!
//! The engine treats push transport as an external collaborator: at-least-
//! once, best-effort, never a precondition for the in-app notification
//! record. Implementations adapt whatever provider is in front of the
//! device fleet; the engine ships a log-only gateway for development.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Delivery failures, split by whether a retry is worthwhile
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Gateway momentarily unreachable; retried once
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// Token no longer valid; caller should drop it, never retry
    #[error("Invalid push token")]
    InvalidToken,

    /// Gateway rejected the payload outright
    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

/// Push delivery gateway
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Deliver one push message to one device token
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
    ) -> Result<(), DeliveryError>;
}

/// Gateway that only logs; used by the daemon when no provider is wired up
pub struct LogOnlyGateway;

#[async_trait]
impl PushGateway for LogOnlyGateway {
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        _data: &HashMap<String, String>,
    ) -> Result<(), DeliveryError> {
        info!(token = %token, title = %title, body = %body, "Push (log only)");
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording fake for fan-out tests

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// One recorded push attempt
    #[derive(Debug, Clone)]
    pub struct SentPush {
        pub token: String,
        pub title: String,
        pub body: String,
        pub data: HashMap<String, String>,
    }

    /// Gateway that records every delivery and can fail the first N calls
    #[derive(Default)]
    pub struct RecordingGateway {
        pub sent: Mutex<Vec<SentPush>>,
        fail_transient: AtomicU32,
    }

    impl RecordingGateway {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `n` calls with a transient error
        pub fn fail_next(&self, n: u32) {
            self.fail_transient.store(n, Ordering::SeqCst);
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PushGateway for RecordingGateway {
        async fn send(
            &self,
            token: &str,
            title: &str,
            body: &str,
            data: &HashMap<String, String>,
        ) -> Result<(), DeliveryError> {
            let remaining = self.fail_transient.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_transient.store(remaining - 1, Ordering::SeqCst);
                return Err(DeliveryError::Transient("gateway down".into()));
            }

            self.sent.lock().unwrap().push(SentPush {
                token: token.to_string(),
                title: title.to_string(),
                body: body.to_string(),
                data: data.clone(),
            });
            Ok(())
        }
    }
}
