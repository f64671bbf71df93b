// Transactional Email (Resend)
//
// Fire-and-forget notifications: an internal alert and a customer
// acknowledgment per new lead, and a welcome note on first newsletter
// subscription. Each send is independently caught; a missing API key
// turns the whole module into a logged no-op.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::models::Lead;

const RESEND_SEND_URL: &str = "https://api.resend.com/emails";

/// Notifier seam used by the ingestion pipeline.
#[async_trait]
pub trait LeadNotifier: Send + Sync {
    /// Send the internal alert and the customer acknowledgment.
    /// Failure of one must not prevent the other from being attempted.
    async fn notify_new_lead(&self, lead: &Lead);

    /// Welcome email for a first-time newsletter subscriber.
    async fn send_newsletter_welcome(&self, email: &str);
}

#[derive(Debug, Serialize)]
struct OutboundEmail<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: String,
}

pub struct ResendMailer {
    http: Client,
    api_key: Option<String>,
    from_email: String,
    internal_recipient: String,
}

impl ResendMailer {
    pub fn new(
        http: Client,
        api_key: Option<String>,
        from_email: String,
        internal_recipient: String,
    ) -> Self {
        Self {
            http,
            api_key,
            from_email,
            internal_recipient,
        }
    }

    async fn send(&self, key: &str, email: OutboundEmail<'_>) {
        let response = self
            .http
            .post(RESEND_SEND_URL)
            .bearer_auth(key)
            .json(&email)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                info!("sent email \"{}\" to {:?}", email.subject, email.to);
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!("email send failed ({}): {}", status, body);
            }
            Err(e) => error!("email send request error: {}", e),
        }
    }
}

#[async_trait]
impl LeadNotifier for ResendMailer {
    async fn notify_new_lead(&self, lead: &Lead) {
        let Some(key) = self.api_key.as_deref() else {
            warn!("Resend API key not configured, skipping lead notifications");
            return;
        };

        let display_name = lead.name.as_deref().unwrap_or(&lead.email);

        self.send(
            key,
            OutboundEmail {
                from: &self.from_email,
                to: vec![&self.internal_recipient],
                subject: &format!("New Lead: {display_name}"),
                html: internal_alert_body(lead),
            },
        )
        .await;

        self.send(
            key,
            OutboundEmail {
                from: &self.from_email,
                to: vec![&lead.email],
                subject: "Thank you for your interest",
                html: acknowledgment_body(lead),
            },
        )
        .await;
    }

    async fn send_newsletter_welcome(&self, email: &str) {
        let Some(key) = self.api_key.as_deref() else {
            warn!("Resend API key not configured, skipping welcome email");
            return;
        };

        self.send(
            key,
            OutboundEmail {
                from: &self.from_email,
                to: vec![email],
                subject: "Welcome to our newsletter",
                html: "<p>Thank you for subscribing!</p>\
                       <p>You will now receive updates about our products, manufacturing \
                       capabilities, and industry news.</p>"
                    .to_string(),
            },
        )
        .await;
    }
}

fn internal_alert_body(lead: &Lead) -> String {
    format!(
        "<h2>New Lead Submission</h2>\
         <p><strong>Name:</strong> {}</p>\
         <p><strong>Email:</strong> {}</p>\
         <p><strong>Phone:</strong> {}</p>\
         <p><strong>Company:</strong> {}</p>\
         <p><strong>Message:</strong> {}</p>",
        lead.name.as_deref().unwrap_or("N/A"),
        lead.email,
        lead.phone.as_deref().unwrap_or("N/A"),
        lead.company.as_deref().unwrap_or("N/A"),
        lead.message,
    )
}

fn acknowledgment_body(lead: &Lead) -> String {
    format!(
        "<h2>Thank you for contacting us!</h2>\
         <p>Dear {},</p>\
         <p>We have received your request and will get back to you shortly.</p>",
        lead.name.as_deref().unwrap_or("Valued Customer"),
    )
}
