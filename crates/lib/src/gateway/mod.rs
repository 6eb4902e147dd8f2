//! Gateway: the webhook HTTP server and the wiring behind it.
//!
//! Single port serves the Messenger webhook, the rendered scan images the
//! decoder fetches, and the PayPal return/cancel callbacks.

mod server;
mod services;

pub use server::{router, run_gateway, GatewayState};
pub use services::{build_scanner, build_services, http_client, Services};
