//! Initialize the configuration directory: create ~/.farebot, a default config,
//! and the state and scan directories.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Ensure `farebot init` has run (config file and state directory exist).
pub fn require_initialized(config_path: &Path, config: &config::Config) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `farebot init` first (config file not found: {})",
            config_path.display()
        );
    }
    let state_dir = config::resolve_state_dir(config, config_path);
    if !state_dir.exists() {
        anyhow::bail!(
            "configuration not initialized; run `farebot init` first (state directory not found: {})",
            state_dir.display()
        );
    }
    Ok(())
}

fn ensure_dir(dir: &Path, what: &str) -> Result<()> {
    if dir.exists() {
        log::debug!("{} directory already exists at {}, skipping", what, dir.display());
        return Ok(());
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating {} directory {}", what, dir.display()))?;
    log::info!("created {} directory at {}", what, dir.display());
    Ok(())
}

/// Create the config directory and default files if they do not exist.
/// An existing `config.json` is left untouched; the state and scan directories
/// are resolved from it.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config::config_dir(config_path).to_path_buf();
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&config::Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    ensure_dir(&config::resolve_state_dir(&config, config_path), "state")?;
    ensure_dir(&config::resolve_scan_dir(&config, config_path), "scan")?;
    Ok(config_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_layout_and_is_idempotent() {
        let root = std::env::temp_dir().join(format!("farebot-init-{}", uuid::Uuid::new_v4()));
        let config_path = root.join("config.json");

        let (config, _) = config::load_config(Some(config_path.clone())).unwrap();
        assert!(require_initialized(&config_path, &config).is_err());

        init_config_dir(&config_path).unwrap();
        assert!(config_path.exists());
        assert!(root.join("state").is_dir());
        assert!(root.join("scans").is_dir());

        std::fs::write(&config_path, r#"{"gateway": {"port": 4000}}"#).unwrap();
        init_config_dir(&config_path).unwrap();
        let (config, _) = config::load_config(Some(config_path.clone())).unwrap();
        assert_eq!(config.gateway.port, 4000);
        assert!(require_initialized(&config_path, &config).is_ok());

        let _ = std::fs::remove_dir_all(root);
    }
}
