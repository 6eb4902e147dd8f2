//! Barcode decoding via an online decoder service.

use super::ScanError;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

const ZXING_DECODE_URL: &str = "https://zxing.org/w/decode";

/// Decodes the symbol in a publicly reachable image. Empty text means no
/// symbol was found.
#[async_trait]
pub trait SymbolDecoder: Send + Sync {
    async fn decode(&self, image_url: &str) -> Result<String, ScanError>;
}

/// ZXing online decoder: `GET <base>?u=<image url>`, result in the first `<pre>`.
#[derive(Clone)]
pub struct ZxingDecoder {
    base_url: String,
    client: reqwest::Client,
}

impl ZxingDecoder {
    pub fn new(base_url: Option<String>, client: reqwest::Client) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| ZXING_DECODE_URL.to_string());
        Self { base_url, client }
    }
}

#[async_trait]
impl SymbolDecoder for ZxingDecoder {
    async fn decode(&self, image_url: &str) -> Result<String, ScanError> {
        let res = self
            .client
            .get(&self.base_url)
            .query(&[("u", image_url)])
            .send()
            .await
            .map_err(|e| ScanError::Decode(e.to_string()))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| ScanError::Decode(e.to_string()))?;
        if status.is_server_error() {
            return Err(ScanError::Decode(format!("{} from {}", status, self.base_url)));
        }
        // a page without a result block decodes to empty text
        Ok(extract_result(&body))
    }
}

fn pre_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<pre>(.*?)</pre>").expect("pre pattern is valid"))
}

/// Trimmed, unescaped text of the first `<pre>` block, or empty.
pub(crate) fn extract_result(html: &str) -> String {
    pre_regex()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| unescape(m.as_str().trim()))
        .unwrap_or_default()
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
