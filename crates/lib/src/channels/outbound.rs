//! Outbound message payload and the send capability.

use async_trait::async_trait;
use serde::Serialize;

/// Text message body. The Send API takes `{ "text": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub text: String,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        &self.text
    }
}

impl From<&str> for OutboundMessage {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for OutboundMessage {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

/// The transport rejected (or never received) an outbound message.
#[derive(Debug, thiserror::Error)]
#[error("send failed: {0}")]
pub struct SendFailed(pub String);

impl From<reqwest::Error> for SendFailed {
    fn from(e: reqwest::Error) -> Self {
        Self(e.to_string())
    }
}

/// Delivers messages to a participant. At-most-once: callers get no retry.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, recipient: &str, message: &OutboundMessage) -> Result<(), SendFailed>;
}
