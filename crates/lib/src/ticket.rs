//! Tickets offered for sale, and their persistence.
//!
//! A ticket is created when a scanned document is recognized and then filled
//! in step by step (price, payout email, payment link, sold flag).

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::Mutex;

/// Known stops on the line. Closed set: anything else is not a ticket we sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stop {
    /// London St Pancras International
    Lspi,
    /// Ebbsfleet International
    Ei,
    /// Ashford International
    Ai,
    /// Calais Fréthun
    Cf,
    /// Lille Europe
    Le,
    /// Brussels Midi/Zuid
    Bmz,
    /// Paris Gare du Nord
    Pgdn,
}

impl Stop {
    pub const ALL: [Stop; 7] = [
        Stop::Lspi,
        Stop::Ei,
        Stop::Ai,
        Stop::Cf,
        Stop::Le,
        Stop::Bmz,
        Stop::Pgdn,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Stop::Lspi => "LSPI",
            Stop::Ei => "EI",
            Stop::Ai => "AI",
            Stop::Cf => "CF",
            Stop::Le => "LE",
            Stop::Bmz => "BMZ",
            Stop::Pgdn => "PGDN",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stop::Lspi => "London St Pancras International",
            Stop::Ei => "Ebbsfleet International",
            Stop::Ai => "Ashford International",
            Stop::Cf => "Calais Fréthun",
            Stop::Le => "Lille Europe",
            Stop::Bmz => "Brussels Midi/Zuid",
            Stop::Pgdn => "Paris Gare du Nord",
        }
    }
}

impl fmt::Display for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Stop {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stop::ALL
            .into_iter()
            .find(|stop| stop.code() == s)
            .ok_or_else(|| format!("unknown stop: {}", s))
    }
}

/// Currencies a ticket can be priced in, one per recognized symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Gbp,
    Eur,
}

impl Currency {
    pub fn code(self) -> &'static str {
        match self {
            Currency::Gbp => "GBP",
            Currency::Eur => "EUR",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Currency::Gbp => "£",
            Currency::Eur => "€",
        }
    }

    /// Currency for a classifier unit: the symbol or the ISO code.
    pub fn from_unit(unit: &str) -> Option<Self> {
        match unit.trim() {
            "£" | "GBP" | "gbp" => Some(Currency::Gbp),
            "€" | "EUR" | "eur" => Some(Currency::Eur),
            _ => None,
        }
    }

    /// `£40.00`
    pub fn format(self, amount: f64) -> String {
        format!("{}{:.2}", self.symbol(), amount)
    }
}

/// A ticket record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub sold: bool,
    /// Seller's participant id.
    pub user: String,
    /// Source document URL.
    pub url: String,
    pub from: Stop,
    pub to: Stop,
    pub date: DateTime<Utc>,
    /// Zone of the departure stop, for display.
    pub timezone: Tz,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payee_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
}

impl Ticket {
    /// Departure in the local time of the departure stop.
    pub fn local_departure(&self) -> DateTime<Tz> {
        self.date.with_timezone(&self.timezone)
    }

    /// Formatted price, when both amount and currency are set.
    pub fn price_label(&self) -> Option<String> {
        Some(self.currency?.format(self.price?))
    }
}

/// Opaque 8-character URL-safe identifier.
pub fn short_id() -> String {
    let mut bytes = [0u8; 6];
    if getrandom::getrandom(&mut bytes).is_err() {
        // fall back to uuid's generator rather than failing ticket creation
        bytes.copy_from_slice(&uuid::Uuid::new_v4().as_bytes()[..6]);
    }
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum TicketStoreError {
    #[error("ticket store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("ticket store data: {0}")]
    Data(#[from] serde_json::Error),
}

/// Ticket persistence: find by id and upsert.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<Ticket>, TicketStoreError>;
    async fn upsert(&self, ticket: &Ticket) -> Result<(), TicketStoreError>;
}

#[derive(Default)]
pub struct MemoryTicketStore {
    inner: Mutex<HashMap<String, Ticket>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Ticket> {
        self.inner.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn find(&self, id: &str) -> Result<Option<Ticket>, TicketStoreError> {
        Ok(self.inner.lock().await.get(id).cloned())
    }

    async fn upsert(&self, ticket: &Ticket) -> Result<(), TicketStoreError> {
        self.inner
            .lock()
            .await
            .insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }
}

/// All tickets in one JSON file, rewritten through a temp file on every upsert.
pub struct FileTicketStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Ticket>>,
}

impl FileTicketStore {
    /// Load the store; a missing file starts empty, an unreadable one is an error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TicketStoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(s) if !s.trim().is_empty() => serde_json::from_str(&s)?,
            Ok(_) => HashMap::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn save(&self, entries: &HashMap<String, Ticket>) -> Result<(), TicketStoreError> {
        let json = serde_json::to_string_pretty(entries)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TicketStore for FileTicketStore {
    async fn find(&self, id: &str) -> Result<Option<Ticket>, TicketStoreError> {
        Ok(self.entries.lock().await.get(id).cloned())
    }

    async fn upsert(&self, ticket: &Ticket) -> Result<(), TicketStoreError> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(ticket.id.clone(), ticket.clone());
        if let Err(e) = self.save(&entries).await {
            // keep memory and disk in step
            match previous {
                Some(p) => entries.insert(p.id.clone(), p),
                None => entries.remove(&ticket.id),
            };
            return Err(e);
        }
        Ok(())
    }
}
