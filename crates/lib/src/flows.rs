//! The conversation: root intent routing, the sell flow (document, price,
//! payout email) and the buy flow.

use crate::bot::{Bot, InboundEvent, Route};
use crate::payment::{PaymentError, PaymentProvider, PaymentRequest, Refusal};
use crate::scan::{Recognition, TicketRecognizer, TravelRecord};
use crate::ticket::{short_id, Currency, Ticket, TicketStore};
use anyhow::Context;
use regex::Regex;
use std::sync::{Arc, OnceLock};

pub const GREETING: &str = "Hi! I can help you sell a Eurostar ticket you can't use anymore. \
Send me the PDF of your ticket, or tell me if you'd like to buy one.";
pub const ASK_FOR_PDF: &str = "OK, send me the PDF version of your ticket. \
Only the person who will pay for it will be able to access it.";
pub const RESEND_PDF: &str = "I need the PDF file of your ticket. Could you send it as an attachment?";
pub const NOT_A_TICKET: &str = "This doesn't look like a valid Eurostar ticket.";
pub const SCAN_FAILED: &str = "Sorry, I couldn't read your ticket right now. Please try again in a few minutes.";
pub const ASK_FOR_PRICE: &str = "How much do you want to sell it for?";
pub const RETRY_PRICE: &str = "Please give me a price with its currency, like £40 or €45.";
pub const ASK_FOR_EMAIL: &str = "What's the email address of your PayPal account? That's where the money will go.";
pub const RETRY_EMAIL: &str = "That doesn't look like an email address. What's the email of your PayPal account?";
pub const PAYPAL_REFUSED: &str = "PayPal didn't accept that address. Could you check it and send it again?";
pub const PAYPAL_NO_ACCOUNT: &str =
    "I can't find a PayPal account for that address. Could you check it and send it again?";
pub const UNKNOWN_TICKET: &str = "Sorry, I can't find that ticket anymore.";
pub const SOLD_OUT: &str = "I'm afraid we've ran out of ticket.";

/// Collaborators the flows need beyond the bot context.
pub struct FlowDeps {
    pub tickets: Arc<dyn TicketStore>,
    pub recognizer: Arc<dyn TicketRecognizer>,
    /// Without a provider, tickets are listed with no payment link.
    pub payments: Option<Arc<dyn PaymentProvider>>,
    /// Public base URL of the gateway, for payment callbacks.
    pub public_url: String,
    pub memo: String,
}

impl FlowDeps {
    fn callback(&self, outcome: &str, ticket: &str) -> String {
        format!(
            "{}/purchase/{}/{}",
            self.public_url.trim_end_matches('/'),
            outcome,
            ticket
        )
    }
}

/// Route list of the whole conversation, `/` included.
pub fn routes(deps: Arc<FlowDeps>) -> Vec<Route> {
    let pdf = deps.clone();
    let price = deps.clone();
    let email = deps;
    vec![
        Route::new("/", |bot, event| root(bot, event)),
        Route::new("/sell-ticket", |bot, _event| sell_ticket(bot)),
        Route::new("/sell-ticket/pdf", move |bot, event| {
            sell_ticket_pdf(bot, event, pdf.clone())
        }),
        Route::new("/sell-ticket/:id/price", move |bot, event| {
            sell_ticket_price(bot, event, price.clone())
        }),
        Route::new("/sell-ticket/:id/paypal-email", move |bot, event| {
            sell_ticket_email(bot, event, email.clone())
        }),
        Route::new("/buy-ticket", |bot, _event| buy_ticket(bot)),
    ]
}

async fn root(bot: Bot, event: InboundEvent) -> anyhow::Result<()> {
    if event.has_intent("buy-ticket") {
        bot.execute("/buy-ticket").await?;
    } else if event.has_intent("sell-ticket") {
        bot.execute("/sell-ticket").await?;
    } else if event.attachment_of("file").is_some() {
        bot.execute("/sell-ticket/pdf").await?;
    } else {
        bot.say(GREETING).await?;
    }
    Ok(())
}

async fn sell_ticket(bot: Bot) -> anyhow::Result<()> {
    bot.ask(ASK_FOR_PDF, "/sell-ticket/pdf").await?;
    Ok(())
}

fn journey(record: &TravelRecord) -> String {
    format!(
        "Eurostar from {} to {} on {}",
        record.from,
        record.to,
        record.local_departure().format("%a %-d %b at %H:%M")
    )
}

async fn sell_ticket_pdf(bot: Bot, event: InboundEvent, deps: Arc<FlowDeps>) -> anyhow::Result<()> {
    let Some(url) = event
        .attachment_of("file")
        .and_then(|a| a.url().map(str::to_string))
    else {
        bot.ask(RESEND_PDF, "/sell-ticket/pdf").await?;
        return Ok(());
    };

    let record = match deps.recognizer.recognize(&url).await {
        Ok(Recognition::Recognized(record)) => record,
        Ok(Recognition::NotRecognized) => {
            bot.say(NOT_A_TICKET).await?;
            return Ok(());
        }
        Err(e) => {
            log::warn!("sell-ticket {}: recognition failed: {}", bot.recipient(), e);
            bot.say(SCAN_FAILED).await?;
            return Ok(());
        }
    };

    let ticket = Ticket {
        id: short_id(),
        sold: false,
        user: bot.recipient().to_string(),
        url,
        from: record.from,
        to: record.to,
        date: record.date,
        timezone: record.timezone,
        price: None,
        currency: None,
        payee_email: None,
        payment_url: None,
    };
    if let Err(e) = deps.tickets.upsert(&ticket).await {
        bot.say(SCAN_FAILED).await?;
        return Err(e).context("saving recognized ticket");
    }
    log::info!("ticket {} created for {}", ticket.id, ticket.user);

    bot.say(journey(&record)).await?;
    bot.ask(ASK_FOR_PRICE, &format!("/sell-ticket/{}/price", ticket.id))
        .await?;
    Ok(())
}

/// The seller's own ticket named by the `:id` segment.
async fn own_ticket(bot: &Bot, event: &InboundEvent, deps: &FlowDeps) -> anyhow::Result<Option<Ticket>> {
    let id = event.param("id").unwrap_or_default();
    let ticket = deps
        .tickets
        .find(id)
        .await
        .with_context(|| format!("loading ticket {}", id))?
        .filter(|t| t.user == bot.recipient() && !t.sold);
    if ticket.is_none() {
        bot.say(UNKNOWN_TICKET).await?;
    }
    Ok(ticket)
}

fn asking_price(event: &InboundEvent) -> Option<(f64, Currency)> {
    event
        .entities()?
        .get("amount_of_money")
        .iter()
        .find_map(|e| {
            let amount = e.as_f64().filter(|a| *a > 0.0)?;
            let currency = Currency::from_unit(e.unit.as_deref()?)?;
            Some((amount, currency))
        })
}

async fn sell_ticket_price(bot: Bot, event: InboundEvent, deps: Arc<FlowDeps>) -> anyhow::Result<()> {
    let Some(mut ticket) = own_ticket(&bot, &event, &deps).await? else {
        return Ok(());
    };
    let Some((amount, currency)) = asking_price(&event) else {
        bot.ask(RETRY_PRICE, &format!("/sell-ticket/{}/price", ticket.id))
            .await?;
        return Ok(());
    };
    ticket.price = Some(amount);
    ticket.currency = Some(currency);
    deps.tickets
        .upsert(&ticket)
        .await
        .context("saving ticket price")?;
    bot.ask(ASK_FOR_EMAIL, &format!("/sell-ticket/{}/paypal-email", ticket.id))
        .await?;
    Ok(())
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"))
}

fn payee_email(event: &InboundEvent) -> Option<String> {
    let classified = event
        .entities()
        .and_then(|e| e.first("email"))
        .and_then(|e| e.as_str());
    classified
        .or_else(|| event.message_text())
        .map(str::trim)
        .filter(|s| email_regex().is_match(s))
        .map(str::to_string)
}

async fn sell_ticket_email(bot: Bot, event: InboundEvent, deps: Arc<FlowDeps>) -> anyhow::Result<()> {
    let Some(mut ticket) = own_ticket(&bot, &event, &deps).await? else {
        return Ok(());
    };
    let retry_path = format!("/sell-ticket/{}/paypal-email", ticket.id);
    let Some(email) = payee_email(&event) else {
        bot.ask(RETRY_EMAIL, &retry_path).await?;
        return Ok(());
    };
    let (Some(amount), Some(currency)) = (ticket.price, ticket.currency) else {
        bot.ask(ASK_FOR_PRICE, &format!("/sell-ticket/{}/price", ticket.id))
            .await?;
        return Ok(());
    };

    if let Some(payments) = &deps.payments {
        let request = PaymentRequest {
            receiver_email: email.clone(),
            amount,
            currency,
            memo: deps.memo.clone(),
            return_url: deps.callback("success", &ticket.id),
            cancel_url: deps.callback("error", &ticket.id),
        };
        match payments.approval_url(&request).await {
            Ok(url) => ticket.payment_url = Some(url),
            Err(e @ PaymentError::Rejected { .. }) => {
                log::info!("ticket {}: paypal refused {}: {}", ticket.id, email, e);
                let reply = match e.refusal() {
                    Some(Refusal::UnknownAccount) => PAYPAL_NO_ACCOUNT.to_string(),
                    Some(Refusal::CurrencyNotAccepted) => format!(
                        "That PayPal account doesn't accept payments in {}. \
                         Could you send the address of another account?",
                        currency.code()
                    ),
                    _ => PAYPAL_REFUSED.to_string(),
                };
                bot.ask(reply, &retry_path).await?;
                return Ok(());
            }
            Err(e) => {
                bot.say(SCAN_FAILED).await?;
                return Err(e).context("preparing payment");
            }
        }
    }
    ticket.payee_email = Some(email);
    deps.tickets
        .upsert(&ticket)
        .await
        .context("saving payee email")?;
    let price = ticket.price_label().unwrap_or_default();
    bot.say(format!(
        "Great, your ticket is listed for {}. I'll let you know as soon as someone buys it.",
        price
    ))
    .await?;
    Ok(())
}

async fn buy_ticket(bot: Bot) -> anyhow::Result<()> {
    bot.say(SOLD_OUT).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{
        ClassificationUnavailable, Dispatcher, Entities, Entity, IntentClassifier,
        MemoryContinuations, RouteTable,
    };
    use crate::channels::{MessageSender, OutboundMessage, SendFailed};
    use crate::scan::ScanError;
    use crate::ticket::{MemoryTicketStore, Stop};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send(&self, _recipient: &str, message: &OutboundMessage) -> Result<(), SendFailed> {
            self.sent.lock().await.push(message.clone());
            Ok(())
        }
    }

    impl RecordingSender {
        async fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .await
                .iter()
                .map(|m| m.as_text().to_string())
                .collect()
        }
    }

    /// Entities by exact message text.
    #[derive(Default)]
    struct ScriptedClassifier(HashMap<String, Entities>);

    #[async_trait]
    impl IntentClassifier for ScriptedClassifier {
        async fn classify(&self, text: &str) -> Result<Entities, ClassificationUnavailable> {
            Ok(self.0.get(text).cloned().unwrap_or_default())
        }
    }

    struct FixedRecognizer(Option<TravelRecord>);

    #[async_trait]
    impl TicketRecognizer for FixedRecognizer {
        async fn recognize(&self, _url: &str) -> Result<Recognition, ScanError> {
            Ok(match &self.0 {
                Some(r) => Recognition::Recognized(r.clone()),
                None => Recognition::NotRecognized,
            })
        }
    }

    struct BrokenRecognizer;

    #[async_trait]
    impl TicketRecognizer for BrokenRecognizer {
        async fn recognize(&self, _url: &str) -> Result<Recognition, ScanError> {
            Err(ScanError::Decode("503".into()))
        }
    }

    #[derive(Default)]
    struct FakePayments {
        requests: Mutex<Vec<PaymentRequest>>,
    }

    #[async_trait]
    impl PaymentProvider for FakePayments {
        async fn approval_url(&self, request: &PaymentRequest) -> Result<String, PaymentError> {
            self.requests.lock().await.push(request.clone());
            let error_id = match request.receiver_email.split('@').next() {
                Some("blocked") => "580022",
                Some("nobody") => "520009",
                Some("dollars-only") => "559044",
                _ => return Ok("https://pay.example/AP-1".to_string()),
            };
            Err(PaymentError::Rejected {
                error_id: Some(error_id.into()),
                message: "Invalid request".into(),
            })
        }
    }

    fn record() -> TravelRecord {
        TravelRecord {
            from: Stop::Lspi,
            to: Stop::Pgdn,
            date: Utc.with_ymd_and_hms(2016, 1, 5, 9, 17, 0).unwrap(),
            timezone: chrono_tz::Europe::London,
            train_number: 9014,
            coach: "012".into(),
            seat: "045".into(),
            fare_class: "2S".into(),
            reference: "QWERTY".into(),
        }
    }

    fn amount(value: f64, unit: &str) -> Entities {
        let mut e = Entities::default();
        e.insert(
            "amount_of_money",
            Entity {
                value: value.into(),
                unit: Some(unit.into()),
                confidence: Some(0.9),
            },
        );
        e
    }

    struct Harness {
        dispatcher: Dispatcher,
        sender: Arc<RecordingSender>,
        tickets: Arc<MemoryTicketStore>,
        payments: Arc<FakePayments>,
    }

    fn harness(recognizer: Arc<dyn TicketRecognizer>) -> Harness {
        let classifier = ScriptedClassifier(HashMap::from([
            ("buy".to_string(), Entities::default().with("intent", "buy-ticket")),
            ("sell".to_string(), Entities::default().with("intent", "sell-ticket")),
            ("40 pounds".to_string(), amount(40.0, "£")),
            ("forty bucks".to_string(), amount(40.0, "$")),
            (
                "it's seller@example.com".to_string(),
                Entities::default().with("email", "seller@example.com"),
            ),
        ]));
        let tickets = Arc::new(MemoryTicketStore::new());
        let payments = Arc::new(FakePayments::default());
        let deps = Arc::new(FlowDeps {
            tickets: tickets.clone(),
            recognizer,
            payments: Some(payments.clone()),
            public_url: "https://bot.example/".into(),
            memo: "Eurostar ticket".into(),
        });
        let sender = Arc::new(RecordingSender::default());
        let dispatcher = Dispatcher::builder(
            RouteTable::new(routes(deps)).unwrap(),
            Arc::new(MemoryContinuations::new()),
            sender.clone(),
        )
        .classifier(Arc::new(classifier))
        .build();
        Harness {
            dispatcher,
            sender,
            tickets,
            payments,
        }
    }

    fn pdf(who: &str) -> InboundEvent {
        InboundEvent::attachment(who, "file", "https://cdn.example/ticket.pdf")
    }

    #[tokio::test]
    async fn attachment_creates_unsold_ticket_and_asks_price() {
        let h = harness(Arc::new(FixedRecognizer(Some(record()))));
        h.dispatcher.dispatch(pdf("u1")).await.unwrap();

        let tickets = h.tickets.all().await;
        assert_eq!(tickets.len(), 1);
        let t = &tickets[0];
        assert!(!t.sold);
        assert_eq!(t.price, None);
        assert_eq!(t.user, "u1");
        assert_eq!(t.url, "https://cdn.example/ticket.pdf");
        assert_eq!(
            h.sender.texts().await,
            vec![
                "Eurostar from LSPI to PGDN on Tue 5 Jan at 09:17".to_string(),
                ASK_FOR_PRICE.to_string(),
            ]
        );
        assert_eq!(
            h.dispatcher.continuations().take("u1").await.unwrap(),
            Some(format!("/sell-ticket/{}/price", t.id))
        );
    }

    #[tokio::test]
    async fn buy_intent_is_sold_out() {
        let h = harness(Arc::new(FixedRecognizer(None)));
        h.dispatcher.dispatch(InboundEvent::text("u1", "buy")).await.unwrap();
        assert_eq!(h.sender.texts().await, vec![SOLD_OUT.to_string()]);
        assert_eq!(h.dispatcher.continuations().take("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unrecognized_document_leaves_nothing_behind() {
        let h = harness(Arc::new(FixedRecognizer(None)));
        h.dispatcher.dispatch(pdf("u1")).await.unwrap();
        assert_eq!(h.sender.texts().await, vec![NOT_A_TICKET.to_string()]);
        assert!(h.tickets.all().await.is_empty());
        assert_eq!(h.dispatcher.continuations().take("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn pipeline_fault_apologizes_without_continuation() {
        let h = harness(Arc::new(BrokenRecognizer));
        h.dispatcher.dispatch(pdf("u1")).await.unwrap();
        assert_eq!(h.sender.texts().await, vec![SCAN_FAILED.to_string()]);
        assert!(h.tickets.all().await.is_empty());
        assert_eq!(h.dispatcher.continuations().take("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sell_intent_waits_for_the_pdf() {
        let h = harness(Arc::new(FixedRecognizer(Some(record()))));
        h.dispatcher.dispatch(InboundEvent::text("u1", "sell")).await.unwrap();
        assert_eq!(h.sender.texts().await, vec![ASK_FOR_PDF.to_string()]);

        // text instead of a file: asked again, still waiting on the same step
        h.dispatcher.dispatch(InboundEvent::text("u1", "hello?")).await.unwrap();
        assert_eq!(h.sender.texts().await.last().unwrap(), RESEND_PDF);
        h.dispatcher.dispatch(pdf("u1")).await.unwrap();
        assert_eq!(h.tickets.all().await.len(), 1);
    }

    #[tokio::test]
    async fn full_sell_flow_lists_the_ticket() {
        let h = harness(Arc::new(FixedRecognizer(Some(record()))));
        h.dispatcher.dispatch(pdf("u1")).await.unwrap();
        h.dispatcher.dispatch(InboundEvent::text("u1", "forty bucks")).await.unwrap();
        assert_eq!(h.sender.texts().await.last().unwrap(), RETRY_PRICE);
        h.dispatcher.dispatch(InboundEvent::text("u1", "40 pounds")).await.unwrap();
        assert_eq!(h.sender.texts().await.last().unwrap(), ASK_FOR_EMAIL);
        h.dispatcher
            .dispatch(InboundEvent::text("u1", "it's seller@example.com"))
            .await
            .unwrap();

        let t = h.tickets.all().await.remove(0);
        assert_eq!(t.price_label().as_deref(), Some("£40.00"));
        assert_eq!(t.payee_email.as_deref(), Some("seller@example.com"));
        assert_eq!(t.payment_url.as_deref(), Some("https://pay.example/AP-1"));
        let requests = h.payments.requests.lock().await;
        assert_eq!(
            requests[0].return_url,
            format!("https://bot.example/purchase/success/{}", t.id)
        );
        assert_eq!(
            h.sender.texts().await.last().unwrap(),
            "Great, your ticket is listed for £40.00. I'll let you know as soon as someone buys it."
        );
        assert_eq!(h.dispatcher.continuations().take("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn refused_payee_is_asked_again() {
        let h = harness(Arc::new(FixedRecognizer(Some(record()))));
        h.dispatcher.dispatch(pdf("u1")).await.unwrap();
        h.dispatcher.dispatch(InboundEvent::text("u1", "40 pounds")).await.unwrap();
        h.dispatcher
            .dispatch(InboundEvent::text("u1", "blocked@example.com"))
            .await
            .unwrap();
        assert_eq!(h.sender.texts().await.last().unwrap(), PAYPAL_REFUSED);
        let t = h.tickets.all().await.remove(0);
        assert_eq!(t.payee_email, None);
        assert_eq!(
            h.dispatcher.continuations().take("u1").await.unwrap(),
            Some(format!("/sell-ticket/{}/paypal-email", t.id))
        );
    }

    #[tokio::test]
    async fn paypal_refusals_get_specific_replies() {
        let h = harness(Arc::new(FixedRecognizer(Some(record()))));
        h.dispatcher.dispatch(pdf("u1")).await.unwrap();
        h.dispatcher.dispatch(InboundEvent::text("u1", "40 pounds")).await.unwrap();

        h.dispatcher
            .dispatch(InboundEvent::text("u1", "nobody@example.com"))
            .await
            .unwrap();
        assert_eq!(h.sender.texts().await.last().unwrap(), PAYPAL_NO_ACCOUNT);

        h.dispatcher
            .dispatch(InboundEvent::text("u1", "dollars-only@example.com"))
            .await
            .unwrap();
        assert_eq!(
            h.sender.texts().await.last().unwrap(),
            "That PayPal account doesn't accept payments in GBP. \
             Could you send the address of another account?"
        );

        let t = h.tickets.all().await.remove(0);
        assert_eq!(t.payee_email, None);
        assert_eq!(
            h.dispatcher.continuations().take("u1").await.unwrap(),
            Some(format!("/sell-ticket/{}/paypal-email", t.id))
        );
    }

    #[tokio::test]
    async fn other_sellers_ticket_is_unknown() {
        let h = harness(Arc::new(FixedRecognizer(Some(record()))));
        h.dispatcher.dispatch(pdf("u1")).await.unwrap();
        let id = h.tickets.all().await[0].id.clone();
        h.dispatcher
            .dispatch_to(&format!("/sell-ticket/{}/price", id), InboundEvent::text("u2", "40 pounds"))
            .await
            .unwrap();
        assert_eq!(h.sender.texts().await.last().unwrap(), UNKNOWN_TICKET);
        assert_eq!(h.tickets.all().await[0].price, None);
    }

    #[tokio::test]
    async fn small_talk_gets_the_greeting() {
        let h = harness(Arc::new(FixedRecognizer(None)));
        h.dispatcher.dispatch(InboundEvent::text("u1", "hello")).await.unwrap();
        assert_eq!(h.sender.texts().await, vec![GREETING.to_string()]);
    }
}
