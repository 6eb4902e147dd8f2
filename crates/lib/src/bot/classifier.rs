//! Intent classifier adapter: free text in, structured entities out.
//!
//! The dispatcher treats a failure here as "no entities"; classification is
//! best-effort and never aborts an event.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const WIT_API_BASE: &str = "https://api.wit.ai";
const WIT_API_VERSION: &str = "20160526";

/// One classified entity value (intent, amount_of_money, email, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// String for intents and emails, number for amounts.
    #[serde(default)]
    pub value: serde_json::Value,
    /// Currency symbol or code for `amount_of_money`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Entity {
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Numeric value; numeric strings ("20.5") are accepted too.
    pub fn as_f64(&self) -> Option<f64> {
        match &self.value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Entity name -> values, in classifier order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entities(BTreeMap<String, Vec<Entity>>);

impl Entities {
    pub fn insert(&mut self, name: impl Into<String>, entity: Entity) {
        self.0.entry(name.into()).or_default().push(entity);
    }

    /// Builder-style variant of [`Entities::insert`] for a string value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(
            name,
            Entity {
                value: value.into(),
                unit: None,
                confidence: None,
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> &[Entity] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&Entity> {
        self.get(name).first()
    }

    pub fn has_intent(&self, intent: &str) -> bool {
        self.get("intent").iter().any(|e| e.as_str() == Some(intent))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }
}

/// The classifier could not be reached or returned an error.
#[derive(Debug, thiserror::Error)]
#[error("classification unavailable: {0}")]
pub struct ClassificationUnavailable(pub String);

impl From<reqwest::Error> for ClassificationUnavailable {
    fn from(e: reqwest::Error) -> Self {
        Self(e.to_string())
    }
}

/// Sends text to an NLU service and returns the entities found in it.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Entities, ClassificationUnavailable>;
}

#[derive(Debug, Deserialize)]
struct WitMessageResponse {
    #[serde(default)]
    entities: Entities,
}

/// Wit.ai `/message` client.
#[derive(Clone)]
pub struct WitClassifier {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl WitClassifier {
    pub fn new(token: impl Into<String>, base_url: Option<String>, client: reqwest::Client) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| WIT_API_BASE.to_string());
        Self {
            base_url,
            token: token.into(),
            client,
        }
    }
}

#[async_trait]
impl IntentClassifier for WitClassifier {
    async fn classify(&self, text: &str) -> Result<Entities, ClassificationUnavailable> {
        let url = format!("{}/message", self.base_url);
        let res = self
            .client
            .post(&url)
            .query(&[("v", WIT_API_VERSION), ("q", text)])
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ClassificationUnavailable(format!("{} {}", status, body)));
        }
        let data: WitMessageResponse = res.json().await?;
        Ok(data.entities)
    }
}
