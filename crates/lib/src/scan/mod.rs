//! Ticket recognition: document URL to a dated travel record.
//!
//! The document is fetched, its first page rendered under each crop preset,
//! every render handed to the symbol decoder by public URL, and the first
//! non-empty decode parsed and resolved against the timetable.

mod decoder;
mod grammar;
mod normalize;
mod render;
mod timetable;

pub use decoder::{SymbolDecoder, ZxingDecoder};
pub use grammar::{parse, DecodedTicket};
pub use normalize::{country_timezone, normalize, station_stop, travel_year};
pub use render::{CropPreset, ImageMagickRenderer, PageRenderer};
pub use timetable::{Timetable, TimetableError};

use crate::ticket::{short_id, Stop};
use async_trait::async_trait;
use chrono::{DateTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("fetching document failed: {0}")]
    Fetch(String),
    #[error("scan io: {0}")]
    Io(#[from] std::io::Error),
    #[error("rendering page failed: {0}")]
    Render(String),
    #[error("symbol decoder failed: {0}")]
    Decode(String),
    #[error("no departure of train {train} from {stop} on {weekday:?}")]
    MissingTimetable {
        train: u16,
        stop: Stop,
        weekday: Weekday,
    },
    #[error("{local} does not exist in {timezone}")]
    NonexistentLocalTime { local: String, timezone: String },
}

/// A recognized journey.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TravelRecord {
    pub from: Stop,
    pub to: Stop,
    pub date: DateTime<Utc>,
    pub timezone: Tz,
    pub train_number: u16,
    pub coach: String,
    pub seat: String,
    pub fare_class: String,
    pub reference: String,
}

impl TravelRecord {
    pub fn local_departure(&self) -> DateTime<Tz> {
        self.date.with_timezone(&self.timezone)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    Recognized(TravelRecord),
    NotRecognized,
}

#[async_trait]
pub trait TicketRecognizer: Send + Sync {
    async fn recognize(&self, document_url: &str) -> Result<Recognition, ScanError>;
}

/// The recognition pipeline. Rendered images live in `workdir` and must be
/// served at `<public_url>/scans/<file>` for the decoder to reach them.
pub struct Scanner {
    http: reqwest::Client,
    renderer: Arc<dyn PageRenderer>,
    decoder: Arc<dyn SymbolDecoder>,
    timetable: Arc<Timetable>,
    workdir: PathBuf,
    public_url: String,
}

impl Scanner {
    pub fn new(
        http: reqwest::Client,
        renderer: Arc<dyn PageRenderer>,
        decoder: Arc<dyn SymbolDecoder>,
        timetable: Arc<Timetable>,
        workdir: impl Into<PathBuf>,
        public_url: &str,
    ) -> Self {
        Self {
            http,
            renderer,
            decoder,
            timetable,
            workdir: workdir.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn image_url(&self, file: &str) -> String {
        format!("{}/scans/{}", self.public_url, file)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ScanError> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ScanError::Fetch(e.to_string()))?;
        if !res.status().is_success() {
            return Err(ScanError::Fetch(format!("{} {}", res.status(), url)));
        }
        let bytes = res
            .bytes()
            .await
            .map_err(|e| ScanError::Fetch(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// Run the pipeline on document bytes already in hand.
    pub async fn recognize_document(&self, document: &[u8]) -> Result<Recognition, ScanError> {
        tokio::fs::create_dir_all(&self.workdir).await?;
        let id = short_id();
        let path = self.workdir.join(format!("{}.pdf", id));
        tokio::fs::write(&path, document).await?;
        let symbol = self.read_symbol(&id, &path).await;
        remove_quietly(&path).await;

        let Some(text) = symbol? else {
            log::info!("scan {}: no symbol under any crop preset", id);
            return Ok(Recognition::NotRecognized);
        };
        let Some(decoded) = grammar::parse(&text) else {
            log::info!("scan {}: decoded text is not a ticket", id);
            return Ok(Recognition::NotRecognized);
        };
        Ok(match normalize(&decoded, &self.timetable)? {
            Some(record) => Recognition::Recognized(record),
            None => Recognition::NotRecognized,
        })
    }

    /// First non-empty decode across the presets. Every rendered image is
    /// removed once the decoder has seen it.
    async fn read_symbol(&self, id: &str, document: &Path) -> Result<Option<String>, ScanError> {
        for preset in CropPreset::ORDER {
            let file = format!("{}-{}.png", id, preset.slug());
            let image = self.workdir.join(&file);
            let decoded = match self.renderer.render(document, preset, &image).await {
                Ok(()) => self.decoder.decode(&self.image_url(&file)).await,
                Err(e) => Err(e),
            };
            remove_quietly(&image).await;
            let text = decoded?;
            let text = text.trim();
            if !text.is_empty() {
                log::debug!("scan {}: symbol found with {}", id, preset.gravity());
                return Ok(Some(text.to_string()));
            }
            log::debug!("scan {}: nothing under {}", id, preset.gravity());
        }
        Ok(None)
    }
}

#[async_trait]
impl TicketRecognizer for Scanner {
    async fn recognize(&self, document_url: &str) -> Result<Recognition, ScanError> {
        let document = self.fetch(document_url).await?;
        self.recognize_document(&document).await
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("scan: could not remove {}: {}", path.display(), e);
        }
    }
}
