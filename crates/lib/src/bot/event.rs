//! Inbound event: one messaging-platform delivery, enriched by the dispatcher
//! with classified entities and matched route params.

use crate::bot::classifier::Entities;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Conversation participant (Messenger page-scoped id).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
}

/// File, image or other attachment; only the payload URL is used.
/// `fallback` attachments arrive with `"payload": null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<AttachmentPayload>,
}

impl Attachment {
    pub fn url(&self) -> Option<&str> {
        self.payload.as_ref().and_then(|p| p.url.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentPayload {
    #[serde(default)]
    pub url: Option<String>,
}

/// Message body of an inbound event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub text: Option<String>,
    /// Set on copies of the page's own outbound messages.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_echo: bool,
    /// Filled by the dispatcher from the classifier, never by the transport.
    #[serde(skip)]
    pub entities: Option<Entities>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// One inbound messaging event. Deserializes straight from a Messenger
/// `messaging[]` item; unknown fields (recipient, timestamp, mid) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub sender: Participant,
    #[serde(default)]
    pub message: Option<Message>,
    /// Named segments of the matched route (e.g. `id` for `/sell-ticket/:id/price`).
    #[serde(skip)]
    pub params: HashMap<String, String>,
}

impl InboundEvent {
    /// Text event from `sender`.
    pub fn text(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: Participant { id: sender.into() },
            message: Some(Message {
                text: Some(text.into()),
                ..Message::default()
            }),
            params: HashMap::new(),
        }
    }

    /// Event carrying one attachment of the given type.
    pub fn attachment(
        sender: impl Into<String>,
        kind: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            sender: Participant { id: sender.into() },
            message: Some(Message {
                attachments: vec![Attachment {
                    kind: kind.into(),
                    payload: Some(AttachmentPayload {
                        url: Some(url.into()),
                    }),
                }],
                ..Message::default()
            }),
            params: HashMap::new(),
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.sender.id
    }

    /// Non-blank message text, if any.
    pub fn message_text(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(|m| m.text.as_deref())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn entities(&self) -> Option<&Entities> {
        self.message.as_ref().and_then(|m| m.entities.as_ref())
    }

    /// True if a classified `intent` entity has this value.
    pub fn has_intent(&self, intent: &str) -> bool {
        self.entities().is_some_and(|e| e.has_intent(intent))
    }

    /// True for copies of messages the page itself sent.
    pub fn is_echo(&self) -> bool {
        self.message.as_ref().is_some_and(|m| m.is_echo)
    }

    /// First attachment of the given type.
    pub fn attachment_of(&self, kind: &str) -> Option<&Attachment> {
        self.message
            .as_ref()
            .and_then(|m| m.attachments.iter().find(|a| a.kind == kind))
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub(crate) fn set_entities(&mut self, entities: Entities) {
        if let Some(message) = self.message.as_mut() {
            message.entities = Some(entities);
        }
    }
}
