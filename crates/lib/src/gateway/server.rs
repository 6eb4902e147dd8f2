//! Gateway HTTP server: Messenger webhook, rendered scans, payment callbacks.

use crate::bot::Dispatcher;
use crate::channels::{MessageSender, OutboundMessage, WebhookPayload};
use crate::config::{self, Config};
use crate::gateway::services::{build_services, Services};
use crate::init;
use crate::ticket::{Ticket, TicketStore};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

const PAYMENT_FAILED: &str =
    "It looks like the payment has failed. Your PayPal account wasn't debited.";

/// Shared state for the gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub dispatcher: Dispatcher,
    pub tickets: Arc<dyn TicketStore>,
    pub sender: Arc<dyn MessageSender>,
    /// Expected `hub.verify_token`; without one, verification always fails.
    pub verify_token: Option<String>,
    /// Rendered page images served under `/scans/`.
    pub scan_dir: PathBuf,
    /// In-flight dispatch tasks; awaited during graceful shutdown.
    pub dispatch_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>,
}

impl GatewayState {
    pub fn new(config: Config, services: Services, scan_dir: PathBuf) -> Self {
        let verify_token = config::resolve_verify_token(&config);
        Self {
            config: Arc::new(config),
            dispatcher: services.dispatcher,
            tickets: services.tickets,
            sender: services.sender,
            verify_token,
            scan_dir,
            dispatch_tasks: Arc::new(tokio::sync::RwLock::new(Vec::new())),
        }
    }

    async fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.dispatch_tasks.write().await;
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }
}

/// All gateway routes over `state`.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/webhook", get(verify_webhook).post(messenger_webhook))
        .route("/scans/:file", get(scan_image))
        .route("/purchase/success/:ticket", get(purchase_success))
        .route("/purchase/error/:ticket", get(purchase_error))
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (e.g. Ctrl+C).
/// Requires the configuration directory to be initialized (`farebot init`).
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    init::require_initialized(&config_path, &config)?;
    let services = build_services(&config, &config_path).await?;
    let scan_dir = config::resolve_scan_dir(&config, &config_path);
    tokio::fs::create_dir_all(&scan_dir)
        .await
        .with_context(|| format!("creating scan directory {}", scan_dir.display()))?;

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let state = GatewayState::new(config, services, scan_dir);
    let dispatch_tasks = state.dispatch_tasks.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(dispatch_tasks))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Waits for in-flight dispatches so no half-handled conversation step is lost.
async fn shutdown_signal(dispatch_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining in-flight dispatches");

    let handles = {
        let mut g = dispatch_tasks.write().await;
        std::mem::take(&mut *g)
    };
    for h in handles {
        let _ = h.await;
    }
    log::info!("dispatch tasks finished");
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
    }))
}

#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// GET /webhook — Messenger subscription handshake; echoes the challenge.
async fn verify_webhook(
    State(state): State<GatewayState>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let expected = state.verify_token.as_deref();
    let matches = params.mode.as_deref() == Some("subscribe")
        && expected.is_some()
        && params.verify_token.as_deref() == expected;
    if !matches {
        log::warn!("webhook verification failed (mode {:?})", params.mode);
        return StatusCode::FORBIDDEN.into_response();
    }
    log::info!("webhook verified");
    params.challenge.unwrap_or_default().into_response()
}

/// POST /webhook — one task per message event; acknowledged before dispatch completes.
async fn messenger_webhook(State(state): State<GatewayState>, body: Bytes) -> StatusCode {
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            log::debug!("webhook: malformed body: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };
    for event in payload.into_events() {
        let dispatcher = state.dispatcher.clone();
        let handle = tokio::spawn(async move {
            let who = event.sender_id().to_string();
            if let Err(e) = dispatcher.dispatch(event).await {
                log::warn!("dispatch for {} failed: {:#}", who, anyhow::Error::from(e));
            }
        });
        state.track(handle).await;
    }
    StatusCode::OK
}

fn is_scan_file(name: &str) -> bool {
    name.strip_suffix(".png").is_some_and(|stem| {
        !stem.is_empty()
            && stem
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}

/// GET /scans/:file — rendered page crops, fetched by the symbol decoder.
async fn scan_image(State(state): State<GatewayState>, Path(file): Path<String>) -> Response {
    if !is_scan_file(&file) {
        return StatusCode::NOT_FOUND.into_response();
    }
    match tokio::fs::read(state.scan_dir.join(&file)).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            log::warn!("scans: reading {} failed: {}", file, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Seller notice, dated in the departure stop's local time.
fn sold_note(ticket: &Ticket) -> OutboundMessage {
    OutboundMessage::text(format!(
        "Good news: your ticket from {} to {} on {} has been sold!",
        ticket.from.name(),
        ticket.to.name(),
        ticket.local_departure().format("%a %-d %b")
    ))
}

/// GET /purchase/success/:ticket — PayPal return URL. Marks the ticket sold,
/// tells the seller, and sends the buyer on to the ticket document.
async fn purchase_success(State(state): State<GatewayState>, Path(id): Path<String>) -> Response {
    let mut ticket = match state.tickets.find(&id).await {
        Ok(Some(t)) => t,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            log::warn!("purchase {}: loading ticket failed: {}", id, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if !ticket.sold {
        ticket.sold = true;
        if let Err(e) = state.tickets.upsert(&ticket).await {
            log::warn!("purchase {}: saving ticket failed: {}", id, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        log::info!("ticket {} sold", id);
        if let Err(e) = state.sender.send(&ticket.user, &sold_note(&ticket)).await {
            log::warn!("purchase {}: notifying seller failed: {}", id, e);
        }
    }
    Redirect::to(&ticket.url).into_response()
}

/// GET /purchase/error/:ticket — PayPal cancel URL.
async fn purchase_error(Path(id): Path<String>) -> Html<&'static str> {
    log::info!("purchase {}: payment cancelled", id);
    Html(PAYMENT_FAILED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_file_names_are_restricted() {
        assert!(is_scan_file("Ab3_x-Yz-se.png"));
        assert!(!is_scan_file(".png"));
        assert!(!is_scan_file("../config.png"));
        assert!(!is_scan_file("a.pdf"));
        assert!(!is_scan_file("a b.png"));
    }

    #[test]
    fn sold_note_uses_the_departure_date() {
        use crate::ticket::Stop;
        use chrono::{TimeZone, Utc};

        let ticket = Ticket {
            id: "abc".into(),
            sold: true,
            user: "u1".into(),
            url: "https://cdn/t.pdf".into(),
            from: Stop::Pgdn,
            to: Stop::Lspi,
            // 00:13 on the 12th in Paris
            date: Utc.with_ymd_and_hms(2016, 1, 11, 23, 13, 0).unwrap(),
            timezone: chrono_tz::Europe::Paris,
            price: Some(40.0),
            currency: None,
            payee_email: None,
            payment_url: None,
        };
        assert_eq!(
            sold_note(&ticket).as_text(),
            "Good news: your ticket from Paris Gare du Nord to London St Pancras International on Tue 12 Jan has been sold!"
        );
    }
}
