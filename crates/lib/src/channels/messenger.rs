//! Messenger channel: webhook envelope types and the Send API client.

use crate::bot::InboundEvent;
use crate::channels::outbound::{MessageSender, OutboundMessage, SendFailed};
use async_trait::async_trait;
use serde::Deserialize;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v2.6";

/// Webhook POST body: `{ "object": "page", "entry": [{ "messaging": [...] }] }`.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

/// Items stay raw so one malformed delivery cannot reject the whole batch.
#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub messaging: Vec<serde_json::Value>,
}

impl WebhookPayload {
    /// Message events of a page subscription, in delivery order. Other objects,
    /// deliveries without a message (read receipts, postbacks), echoes of the
    /// page's own messages and items that fail to parse yield nothing.
    pub fn into_events(self) -> Vec<InboundEvent> {
        if self.object != "page" {
            return Vec::new();
        }
        self.entry
            .into_iter()
            .flat_map(|e| e.messaging)
            .filter_map(|item| match serde_json::from_value::<InboundEvent>(item) {
                Ok(event) => Some(event),
                Err(e) => {
                    log::warn!("webhook: skipping malformed messaging item: {}", e);
                    None
                }
            })
            .filter(|e| e.message.is_some() && !e.sender.id.is_empty() && !e.is_echo())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct SendApiError {
    error: SendApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct SendApiErrorBody {
    #[serde(default)]
    message: String,
}

/// Messenger Send API client.
#[derive(Clone)]
pub struct MessengerSender {
    api_base: String,
    page_token: Option<String>,
    client: reqwest::Client,
}

impl MessengerSender {
    pub fn new(page_token: Option<String>, api_base: Option<String>, client: reqwest::Client) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| GRAPH_API_BASE.to_string());
        Self {
            api_base,
            page_token,
            client,
        }
    }
}

#[async_trait]
impl MessageSender for MessengerSender {
    async fn send(&self, recipient: &str, message: &OutboundMessage) -> Result<(), SendFailed> {
        let token = self
            .page_token
            .as_ref()
            .ok_or_else(|| SendFailed("messenger page access token not configured".to_string()))?;
        let url = format!("{}/me/messages", self.api_base);
        let body = serde_json::json!({
            "recipient": { "id": recipient },
            "message": message,
        });
        let res = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<SendApiError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(SendFailed(format!("{} {}", status, detail)));
        }
        log::debug!("messenger: delivered message to {}", recipient);
        Ok(())
    }
}
