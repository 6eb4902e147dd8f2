//! Conversational context handed to every handler.

use crate::bot::continuation::StoreError;
use crate::bot::dispatcher::{DispatchError, Dispatcher};
use crate::bot::event::InboundEvent;
use crate::channels::{OutboundMessage, SendFailed};

#[derive(Debug, thiserror::Error)]
pub enum AskError {
    #[error("scheduling continuation failed: {0}")]
    Continuation(#[from] StoreError),
    #[error(transparent)]
    Send(#[from] SendFailed),
}

/// `say` / `ask` / `execute`, bound to one inbound event and its sender.
#[derive(Clone)]
pub struct Bot {
    dispatcher: Dispatcher,
    event: InboundEvent,
    depth: usize,
}

impl Bot {
    pub(crate) fn new(dispatcher: Dispatcher, event: InboundEvent, depth: usize) -> Self {
        Self {
            dispatcher,
            event,
            depth,
        }
    }

    /// Participant this context replies to.
    pub fn recipient(&self) -> &str {
        self.event.sender_id()
    }

    /// Send a message to the sender now. No retry on failure.
    pub async fn say(&self, message: impl Into<OutboundMessage>) -> Result<(), SendFailed> {
        let message = message.into();
        self.dispatcher
            .sender()
            .send(self.recipient(), &message)
            .await
            .inspect_err(|e| log::warn!("say to {} failed: {}", self.recipient(), e))
    }

    /// Schedule `path` for the sender's next message, then say `message`.
    /// The continuation is written first; if that fails nothing is sent.
    pub async fn ask(&self, message: impl Into<OutboundMessage>, path: &str) -> Result<(), AskError> {
        self.dispatcher
            .continuations()
            .set(self.recipient(), path)
            .await?;
        self.say(message).await?;
        Ok(())
    }

    /// Re-enter the dispatcher with the same event on another path.
    pub async fn execute(&self, path: &str) -> Result<(), DispatchError> {
        self.dispatcher
            .execute(path.to_string(), self.event.clone(), self.depth + 1)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::continuation::{Continuation, ContinuationBackend, MemoryContinuations};
    use crate::bot::routes::{Route, RouteTable};
    use crate::channels::MessageSender;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Records every attempt, then rejects it.
    #[derive(Default)]
    struct RejectingSender {
        attempts: Mutex<usize>,
    }

    #[async_trait]
    impl MessageSender for RejectingSender {
        async fn send(&self, _recipient: &str, _message: &OutboundMessage) -> Result<(), SendFailed> {
            *self.attempts.lock().await += 1;
            Err(SendFailed("400 recipient unavailable".into()))
        }
    }

    #[derive(Default)]
    struct CountingSender {
        sent: Mutex<usize>,
    }

    #[async_trait]
    impl MessageSender for CountingSender {
        async fn send(&self, _recipient: &str, _message: &OutboundMessage) -> Result<(), SendFailed> {
            *self.sent.lock().await += 1;
            Ok(())
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl ContinuationBackend for BrokenBackend {
        async fn put(&self, _participant: &str, _continuation: Continuation) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        async fn take(&self, _participant: &str) -> Result<Option<Continuation>, StoreError> {
            Ok(None)
        }
    }

    fn routes() -> RouteTable {
        RouteTable::new(vec![
            Route::new("/", |_bot, _event| async { Ok(()) }),
            Route::new("/sell-ticket/:id/price", |_bot, _event| async { Ok(()) }),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn failed_send_keeps_the_scheduled_continuation() {
        let sender = Arc::new(RejectingSender::default());
        let dispatcher =
            Dispatcher::builder(routes(), Arc::new(MemoryContinuations::new()), sender.clone()).build();
        let bot = Bot::new(dispatcher.clone(), InboundEvent::text("u1", "sell"), 0);

        let err = bot.ask("How much?", "/sell-ticket/abc/price").await.unwrap_err();
        assert!(matches!(err, AskError::Send(_)));
        assert_eq!(*sender.attempts.lock().await, 1);
        assert_eq!(
            dispatcher.continuations().take("u1").await.unwrap().as_deref(),
            Some("/sell-ticket/abc/price")
        );
    }

    #[tokio::test]
    async fn failed_continuation_write_sends_nothing() {
        let sender = Arc::new(CountingSender::default());
        let dispatcher = Dispatcher::builder(routes(), Arc::new(BrokenBackend), sender.clone()).build();
        let bot = Bot::new(dispatcher, InboundEvent::text("u1", "sell"), 0);

        let err = bot.ask("How much?", "/sell-ticket/abc/price").await.unwrap_err();
        assert!(matches!(err, AskError::Continuation(_)));
        assert_eq!(*sender.sent.lock().await, 0);
    }
}
