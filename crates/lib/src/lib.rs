//! farebot core library: the conversational dispatch engine, the ticket
//! recognition pipeline, and the collaborators (Messenger, Wit, PayPal,
//! persistence) the webhook gateway wires together.

pub mod bot;
pub mod channels;
pub mod config;
pub mod flows;
pub mod gateway;
pub mod init;
pub mod payment;
pub mod scan;
pub mod ticket;
