//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (`~/.farebot/config.json` by default) and
//! environment. Secrets and the public URL can come from either; a non-empty
//! environment variable wins.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::payment::PaypalCredentials;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Messenger page token and webhook verify token.
    #[serde(default)]
    pub messenger: MessengerConfig,

    /// Intent classifier (Wit.ai).
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Ticket recognition pipeline.
    #[serde(default)]
    pub scan: ScanConfig,

    /// Where tickets and continuations are kept.
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub continuations: ContinuationsConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub payment: PaymentConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the webhook and callbacks (default 3000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessengerConfig {
    /// Overridden by FACEBOOK_PAGE_ACCESS_TOKEN.
    pub page_access_token: Option<String>,
    /// Overridden by FACEBOOK_VERIFY_TOKEN.
    pub verify_token: Option<String>,
    /// Graph API base (default https://graph.facebook.com/v2.6).
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    /// Overridden by WIT_ACCESS_TOKEN. Without a token, messages are not classified.
    pub access_token: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    /// Public base URL of this gateway; the decoder fetches renders from
    /// `<publicUrl>/scans/`. Overridden by FAREBOT_PUBLIC_URL.
    pub public_url: Option<String>,
    /// Symbol decoder endpoint (default https://zxing.org/w/decode).
    pub decoder_url: Option<String>,
    /// ImageMagick binary (default "convert").
    pub convert_bin: Option<String>,
    /// Render directory. Relative paths resolve against the config directory
    /// (default `scans`).
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// State directory for `tickets.json` and `continuations.json`. Relative
    /// paths resolve against the config directory (default `state`).
    pub directory: Option<PathBuf>,
    /// Continuations go to Redis when set (needs the `redis` feature).
    /// Overridden by REDIS_URL.
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationsConfig {
    /// Drop pending continuations older than this. Unset keeps them forever.
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherConfig {
    /// Longest `execute` chain per event (default 8).
    #[serde(default = "default_max_chain")]
    pub max_chain: usize,
}

fn default_max_chain() -> usize {
    crate::bot::DEFAULT_MAX_CHAIN
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_chain: default_max_chain(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfig {
    /// PAYPAL_SECURITY_USERID
    pub user_id: Option<String>,
    /// PAYPAL_SECURITY_PASSWORD
    pub password: Option<String>,
    /// PAYPAL_SECURITY_SIGNATURE
    pub signature: Option<String>,
    /// PAYPAL_APPLICATION_ID
    pub app_id: Option<String>,
    /// Use the PayPal sandbox (default true).
    pub sandbox: Option<bool>,
    /// Memo shown to the buyer.
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// Timeout for every outbound request and for page rendering (default 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Non-empty trimmed env value, else the non-empty trimmed configured value.
fn env_or(var: &str, configured: Option<&String>) -> Option<String> {
    pick(std::env::var(var).ok(), configured)
}

fn pick(env: Option<String>, configured: Option<&String>) -> Option<String> {
    env.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            configured
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve the Messenger page token: env FACEBOOK_PAGE_ACCESS_TOKEN overrides config.
pub fn resolve_page_access_token(config: &Config) -> Option<String> {
    env_or(
        "FACEBOOK_PAGE_ACCESS_TOKEN",
        config.messenger.page_access_token.as_ref(),
    )
}

/// Resolve the webhook verify token: env FACEBOOK_VERIFY_TOKEN overrides config.
pub fn resolve_verify_token(config: &Config) -> Option<String> {
    env_or("FACEBOOK_VERIFY_TOKEN", config.messenger.verify_token.as_ref())
}

/// Resolve the Wit.ai token: env WIT_ACCESS_TOKEN overrides config.
pub fn resolve_wit_token(config: &Config) -> Option<String> {
    env_or("WIT_ACCESS_TOKEN", config.classifier.access_token.as_ref())
}

/// Resolve the public base URL: env FAREBOT_PUBLIC_URL overrides config, then
/// the local gateway address.
pub fn resolve_public_url(config: &Config) -> String {
    env_or("FAREBOT_PUBLIC_URL", config.scan.public_url.as_ref())
        .unwrap_or_else(|| format!("http://{}:{}", config.gateway.bind, config.gateway.port))
        .trim_end_matches('/')
        .to_string()
}

pub fn resolve_redis_url(config: &Config) -> Option<String> {
    env_or("REDIS_URL", config.store.redis_url.as_ref())
}

/// Resolve PayPal credentials; each field from its PAYPAL_* env var or config.
pub fn resolve_paypal_credentials(config: &Config) -> PaypalCredentials {
    let p = &config.payment;
    PaypalCredentials {
        user_id: env_or("PAYPAL_SECURITY_USERID", p.user_id.as_ref()),
        password: env_or("PAYPAL_SECURITY_PASSWORD", p.password.as_ref()),
        signature: env_or("PAYPAL_SECURITY_SIGNATURE", p.signature.as_ref()),
        app_id: env_or("PAYPAL_APPLICATION_ID", p.app_id.as_ref()),
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("FAREBOT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".farebot").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, else the default path (or FAREBOT_CONFIG_PATH).
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Parent directory of the config file.
pub fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn resolve_dir(configured: Option<&PathBuf>, config_path: &Path, default: &str) -> PathBuf {
    match configured {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                config_dir(config_path).join(d)
            }
        }
        _ => config_dir(config_path).join(default),
    }
}

/// State directory: `store.directory` or `state` next to the config file.
pub fn resolve_state_dir(config: &Config, config_path: &Path) -> PathBuf {
    resolve_dir(config.store.directory.as_ref(), config_path, "state")
}

/// Render directory: `scan.directory` or `scans` next to the config file.
pub fn resolve_scan_dir(config: &Config, config_path: &Path) -> PathBuf {
    resolve_dir(config.scan.directory.as_ref(), config_path, "scans")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.gateway.port, 3000);
        assert_eq!(c.gateway.bind, "127.0.0.1");
        assert_eq!(c.dispatcher.max_chain, 8);
        assert_eq!(c.http.timeout_secs, 30);
        assert_eq!(c.continuations.ttl_secs, None);
    }

    #[test]
    fn camel_case_sections_with_partial_defaults() {
        let c: Config = serde_json::from_str(
            r#"{
                "gateway": {"port": 8080},
                "messenger": {"verifyToken": "v"},
                "continuations": {"ttlSecs": 3600},
                "dispatcher": {},
                "payment": {"appId": "APP-1", "sandbox": false}
            }"#,
        )
        .unwrap();
        assert_eq!(c.gateway.port, 8080);
        assert_eq!(c.gateway.bind, "127.0.0.1");
        assert_eq!(c.messenger.verify_token.as_deref(), Some("v"));
        assert_eq!(c.continuations.ttl_secs, Some(3600));
        assert_eq!(c.dispatcher.max_chain, 8);
        assert_eq!(c.payment.sandbox, Some(false));
    }

    #[test]
    fn env_value_wins_when_not_blank() {
        let configured = "from-config".to_string();
        assert_eq!(
            pick(Some(" from-env ".into()), Some(&configured)).as_deref(),
            Some("from-env")
        );
        assert_eq!(
            pick(Some("  ".into()), Some(&configured)).as_deref(),
            Some("from-config")
        );
        assert_eq!(pick(None, Some(&"".to_string())), None);
    }

    #[test]
    fn state_and_scan_dirs_default_next_to_config() {
        let config = Config::default();
        let path = Path::new("/home/user/.farebot/config.json");
        assert_eq!(
            resolve_state_dir(&config, path),
            PathBuf::from("/home/user/.farebot/state")
        );
        assert_eq!(
            resolve_scan_dir(&config, path),
            PathBuf::from("/home/user/.farebot/scans")
        );
    }

    #[test]
    fn relative_and_absolute_overrides() {
        let mut config = Config::default();
        config.store.directory = Some(PathBuf::from("data"));
        config.scan.directory = Some(PathBuf::from("/var/farebot/scans"));
        let path = Path::new("/home/user/.farebot/config.json");
        assert_eq!(
            resolve_state_dir(&config, path),
            PathBuf::from("/home/user/.farebot/data")
        );
        assert_eq!(
            resolve_scan_dir(&config, path),
            PathBuf::from("/var/farebot/scans")
        );
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir()
            .join(format!("farebot-config-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.gateway.port, 3000);
    }
}
