//! Messaging channels.
//!
//! The dispatch engine only needs the [`MessageSender`] capability; the
//! Messenger connector provides it and the webhook envelope types the gateway
//! parses inbound deliveries with.

mod messenger;
mod outbound;

pub use messenger::{MessengerSender, WebhookEntry, WebhookPayload};
pub use outbound::{MessageSender, OutboundMessage, SendFailed};
