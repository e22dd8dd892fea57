//! Resend email client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{EmailMessage, Notifier};
use crate::error::{PaymentError, PaymentResult};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    id: String,
}

pub struct ResendNotifier {
    api_key: String,
    from_email: String,
    client: reqwest::Client,
}

impl ResendNotifier {
    pub fn new(api_key: String, from_email: String) -> Self {
        Self {
            api_key,
            from_email,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send(&self, message: &EmailMessage) -> PaymentResult<()> {
        let request = ResendEmailRequest {
            from: &self.from_email,
            to: &message.to,
            subject: &message.subject,
            html: &message.html,
        };

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PaymentError::Notification(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PaymentError::Notification(format!(
                "Resend API error: {}",
                error_text
            )));
        }

        let result: ResendEmailResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Notification(e.to_string()))?;
        tracing::debug!(email_id = %result.id, to = %message.to, "Email sent via Resend");
        Ok(())
    }
}
