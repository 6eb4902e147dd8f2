//! Builds the dispatcher, stores and pipeline from config.

use crate::bot::{
    ContinuationBackend, Dispatcher, FileContinuations, RouteTable, WitClassifier,
};
use crate::channels::{MessageSender, MessengerSender};
use crate::config::{self, Config};
use crate::flows::{self, FlowDeps};
use crate::payment::{PaymentProvider, PaypalAdaptive};
use crate::scan::{ImageMagickRenderer, Scanner, Timetable, ZxingDecoder};
use crate::ticket::{FileTicketStore, TicketStore};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Everything the gateway handlers share.
pub struct Services {
    pub dispatcher: Dispatcher,
    pub tickets: Arc<dyn TicketStore>,
    pub sender: Arc<dyn MessageSender>,
}

/// Shared HTTP client with the configured request timeout.
pub fn http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.http.timeout())
        .build()
        .context("building http client")
}

/// The recognition pipeline: ImageMagick renders, ZXing decodes, embedded timetable.
pub fn build_scanner(config: &Config, config_path: &Path, http: reqwest::Client) -> Result<Scanner> {
    let timetable = Timetable::eurostar().context("loading timetable")?;
    log::debug!("timetable: {} scheduled departures", timetable.len());
    let renderer = ImageMagickRenderer::new(
        config
            .scan
            .convert_bin
            .clone()
            .unwrap_or_else(|| "convert".to_string()),
        config.http.timeout(),
    );
    let decoder = ZxingDecoder::new(config.scan.decoder_url.clone(), http.clone());
    Ok(Scanner::new(
        http,
        Arc::new(renderer),
        Arc::new(decoder),
        Arc::new(timetable),
        config::resolve_scan_dir(config, config_path),
        &config::resolve_public_url(config),
    ))
}

async fn continuation_backend(config: &Config, state_dir: &Path) -> Result<Arc<dyn ContinuationBackend>> {
    if let Some(url) = config::resolve_redis_url(config) {
        #[cfg(feature = "redis")]
        {
            let redis = crate::bot::RedisContinuations::connect(&url)
                .await
                .context("connecting to redis")?;
            log::info!("continuations stored in redis");
            return Ok(Arc::new(redis));
        }
        #[cfg(not(feature = "redis"))]
        log::warn!(
            "redis url {} configured but built without the redis feature; using the state file",
            url
        );
    }
    Ok(Arc::new(FileContinuations::new(state_dir.join("continuations.json"))))
}

fn payment_provider(config: &Config, http: reqwest::Client) -> Option<Arc<dyn PaymentProvider>> {
    let credentials = config::resolve_paypal_credentials(config);
    let complete = credentials.user_id.is_some()
        && credentials.password.is_some()
        && credentials.signature.is_some()
        && credentials.app_id.is_some();
    if !complete {
        log::info!("paypal credentials incomplete; tickets are listed without payment links");
        return None;
    }
    let sandbox = config.payment.sandbox.unwrap_or(true);
    Some(Arc::new(PaypalAdaptive::new(credentials, sandbox, None, http)))
}

/// Wire stores, classifier, sender, pipeline and flows into a dispatcher.
pub async fn build_services(config: &Config, config_path: &Path) -> Result<Services> {
    let http = http_client(config)?;
    let state_dir = config::resolve_state_dir(config, config_path);

    let tickets: Arc<dyn TicketStore> = Arc::new(
        FileTicketStore::load(state_dir.join("tickets.json"))
            .await
            .context("loading ticket store")?,
    );
    let sender: Arc<dyn MessageSender> = Arc::new(MessengerSender::new(
        config::resolve_page_access_token(config),
        config.messenger.api_base.clone(),
        http.clone(),
    ));
    if config::resolve_page_access_token(config).is_none() {
        log::warn!("no messenger page access token; replies will fail");
    }

    let deps = Arc::new(FlowDeps {
        tickets: tickets.clone(),
        recognizer: Arc::new(build_scanner(config, config_path, http.clone())?),
        payments: payment_provider(config, http.clone()),
        public_url: config::resolve_public_url(config),
        memo: config
            .payment
            .memo
            .clone()
            .unwrap_or_else(|| "Eurostar ticket".to_string()),
    });
    let routes = RouteTable::new(flows::routes(deps)).context("building route table")?;
    log::debug!(
        "routes: {}",
        routes.patterns().collect::<Vec<_>>().join(", ")
    );

    let mut builder = Dispatcher::builder(
        routes,
        continuation_backend(config, &state_dir).await?,
        sender.clone(),
    )
    .max_chain(config.dispatcher.max_chain)
    .continuation_ttl(
        config
            .continuations
            .ttl_secs
            .and_then(|s| chrono::Duration::try_seconds(i64::try_from(s).ok()?)),
    );
    match config::resolve_wit_token(config) {
        Some(token) => {
            builder = builder.classifier(Arc::new(WitClassifier::new(
                token,
                config.classifier.base_url.clone(),
                http,
            )));
        }
        None => log::warn!("no wit access token; messages are not classified"),
    }

    Ok(Services {
        dispatcher: builder.build(),
        tickets,
        sender,
    })
}
