//! Dispatcher: runs one inbound event through
//! `Classifying -> Resolving -> Matched -> Executing -> Done` (or `Failed`).
//!
//! A pending continuation beats both the requested path and any classified
//! intent: whatever the bot last asked is how the reply gets interpreted.

use crate::bot::classifier::IntentClassifier;
use crate::bot::context::Bot;
use crate::bot::continuation::{ContinuationBackend, ContinuationStore};
use crate::bot::event::InboundEvent;
use crate::bot::routes::{RouteTable, ROOT};
use crate::channels::MessageSender;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Default bound on `execute` hops within one event.
pub const DEFAULT_MAX_CHAIN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("execute chain too deep: {path} at depth {depth} (max {max})")]
    ChainTooDeep {
        path: String,
        depth: usize,
        max: usize,
    },
    #[error("handler for {path} failed")]
    Handler {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Classifying,
    Resolving,
    Matched,
    Executing,
    Done,
    Failed,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchState::Classifying => "classifying",
            DispatchState::Resolving => "resolving",
            DispatchState::Matched => "matched",
            DispatchState::Executing => "executing",
            DispatchState::Done => "done",
            DispatchState::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct Inner {
    routes: Arc<RouteTable>,
    continuations: ContinuationStore,
    classifier: Option<Arc<dyn IntentClassifier>>,
    sender: Arc<dyn MessageSender>,
    max_chain: usize,
}

/// Cheap to clone; every clone shares the same table, store and collaborators.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

pub struct DispatcherBuilder {
    routes: Arc<RouteTable>,
    continuations: Arc<dyn ContinuationBackend>,
    sender: Arc<dyn MessageSender>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    max_chain: usize,
    ttl: Option<chrono::Duration>,
}

impl DispatcherBuilder {
    pub fn classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn max_chain(mut self, max_chain: usize) -> Self {
        self.max_chain = max_chain;
        self
    }

    pub fn continuation_ttl(mut self, ttl: Option<chrono::Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn build(self) -> Dispatcher {
        let continuations =
            ContinuationStore::new(self.continuations, self.routes.clone()).with_ttl(self.ttl);
        Dispatcher {
            inner: Arc::new(Inner {
                routes: self.routes,
                continuations,
                classifier: self.classifier,
                sender: self.sender,
                max_chain: self.max_chain,
            }),
        }
    }
}

impl Dispatcher {
    pub fn builder(
        routes: RouteTable,
        continuations: Arc<dyn ContinuationBackend>,
        sender: Arc<dyn MessageSender>,
    ) -> DispatcherBuilder {
        DispatcherBuilder {
            routes: Arc::new(routes),
            continuations,
            sender,
            classifier: None,
            max_chain: DEFAULT_MAX_CHAIN,
            ttl: None,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    pub fn continuations(&self) -> &ContinuationStore {
        &self.inner.continuations
    }

    pub(crate) fn sender(&self) -> &Arc<dyn MessageSender> {
        &self.inner.sender
    }

    /// Handle one inbound event on the default entry path.
    pub async fn dispatch(&self, event: InboundEvent) -> Result<(), DispatchError> {
        self.dispatch_to(ROOT, event).await
    }

    /// Handle one inbound event on `path`, unless a continuation is pending.
    pub async fn dispatch_to(&self, path: &str, mut event: InboundEvent) -> Result<(), DispatchError> {
        let who = event.sender_id().to_string();
        log::debug!("dispatch {}: {}", who, DispatchState::Classifying);
        if let (Some(classifier), Some(text)) = (&self.inner.classifier, event.message_text()) {
            match classifier.classify(text).await {
                Ok(entities) => event.set_entities(entities),
                Err(e) => log::warn!("dispatch {}: {}; continuing without entities", who, e),
            }
        }

        log::debug!("dispatch {}: {}", who, DispatchState::Resolving);
        let path = match self.inner.continuations.take(&who).await {
            Ok(Some(pending)) => {
                log::debug!("dispatch {}: resuming continuation {}", who, pending);
                pending
            }
            Ok(None) => path.to_string(),
            Err(e) => {
                log::warn!("dispatch {}: continuation lookup failed: {}", who, e);
                path.to_string()
            }
        };

        self.run(path, event, 0).await
    }

    /// Chained entry used by [`Bot::execute`].
    pub(crate) fn execute(
        &self,
        path: String,
        event: InboundEvent,
        depth: usize,
    ) -> BoxFuture<'static, Result<(), DispatchError>> {
        let this = self.clone();
        Box::pin(async move {
            if depth > this.inner.max_chain {
                log::warn!(
                    "dispatch {}: {} ({} exceeds max chain {})",
                    event.sender_id(),
                    DispatchState::Failed,
                    path,
                    this.inner.max_chain
                );
                return Err(DispatchError::ChainTooDeep {
                    path,
                    depth,
                    max: this.inner.max_chain,
                });
            }
            this.run(path, event, depth).await
        })
    }

    async fn run(&self, path: String, mut event: InboundEvent, depth: usize) -> Result<(), DispatchError> {
        let who = event.sender_id().to_string();
        let matched = self.inner.routes.resolve(&path);
        log::debug!(
            "dispatch {}: {} {} -> {} (depth {})",
            who,
            DispatchState::Matched,
            path,
            matched.pattern,
            depth
        );
        event.params = matched.params;

        log::debug!("dispatch {}: {} {}", who, DispatchState::Executing, matched.pattern);
        let bot = Bot::new(self.clone(), event.clone(), depth);
        match (matched.handler)(bot, event).await {
            Ok(()) => {
                log::debug!("dispatch {}: {} {}", who, DispatchState::Done, matched.pattern);
                Ok(())
            }
            Err(source) => {
                log::debug!("dispatch {}: {} {}", who, DispatchState::Failed, matched.pattern);
                Err(DispatchError::Handler {
                    path: matched.pattern,
                    source,
                })
            }
        }
    }
}
