//! Conversational dispatch engine.
//!
//! A stateless webhook delivers one [`InboundEvent`] at a time; the
//! [`Dispatcher`] classifies it, resumes the participant's pending
//! continuation (if any), matches the path in the [`RouteTable`] and runs the
//! handler with a [`Bot`] bound to that participant.

mod classifier;
mod context;
mod continuation;
mod dispatcher;
mod event;
mod routes;

pub use classifier::{ClassificationUnavailable, Entities, Entity, IntentClassifier, WitClassifier};
pub use context::{AskError, Bot};
#[cfg(feature = "redis")]
pub use continuation::RedisContinuations;
pub use continuation::{
    Continuation, ContinuationBackend, ContinuationStore, FileContinuations, MemoryContinuations,
    StoreError,
};
pub use dispatcher::{DispatchError, Dispatcher, DispatcherBuilder, DEFAULT_MAX_CHAIN};
pub use event::{Attachment, AttachmentPayload, InboundEvent, Message, Participant};
pub use routes::{Handler, Route, RouteError, RouteMatch, RouteTable, ROOT};
