//! Outbound email notifications
//!
//! Sending is best-effort: callers log failures and move on.

mod resend;
pub mod templates;

pub use resend::ResendNotifier;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::PaymentResult;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> PaymentResult<()>;
}

/// Notifier that only logs; used when no email provider is configured
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &EmailMessage) -> PaymentResult<()> {
        tracing::info!(to = %message.to, subject = %message.subject, "Email (not sent, no provider configured)");
        Ok(())
    }
}
