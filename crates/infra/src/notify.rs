//! Invitation notification collaborator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use atrium_core::Email;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Delivers invitation messages (mail, chat, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_invitation_message(
        &self,
        email: &Email,
        redeem_url: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), NotifyError>;
}

/// Writes a structured event instead of sending anything.
///
/// The redeem URL carries the token, so it is only logged at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_invitation_message(
        &self,
        email: &Email,
        redeem_url: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        tracing::info!(email = %email, %expires_at, "invitation message queued");
        tracing::debug!(redeem_url, "invitation link");
        Ok(())
    }
}

/// A message captured by [`OutboxNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    pub email: Email,
    pub redeem_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Records messages in memory; can be switched to fail. For tests.
#[derive(Debug, Default)]
pub struct OutboxNotifier {
    sent: RwLock<Vec<OutboxMessage>>,
    failing: AtomicBool,
}

impl OutboxNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboxMessage> {
        self.sent.read().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send_invitation_message(
        &self,
        email: &Email,
        redeem_url: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("outbox is failing".to_string()));
        }
        let mut sent = self
            .sent
            .write()
            .map_err(|_| NotifyError::Delivery("lock poisoned".to_string()))?;
        sent.push(OutboxMessage {
            email: email.clone(),
            redeem_url: redeem_url.to_string(),
            expires_at,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outbox_records_and_fails_on_demand() {
        let outbox = OutboxNotifier::new();
        let email = Email::parse("v@vendor.io").unwrap();
        let at = Utc::now();

        outbox
            .send_invitation_message(&email, "https://x/invite?token=t", at)
            .await
            .unwrap();
        assert_eq!(outbox.sent().len(), 1);

        outbox.set_failing(true);
        assert!(outbox.send_invitation_message(&email, "u", at).await.is_err());
        assert_eq!(outbox.sent().len(), 1);
    }
}
