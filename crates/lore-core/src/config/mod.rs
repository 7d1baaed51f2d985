mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

use crate::vault::{Secret, VaultProvider};

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    /// and validate the result.
    ///
    /// A missing file yields the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// a value is out of range.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check every tuning knob against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> anyhow::Result<()> {
        let d = &self.defaults;
        if !(1..=MAX_CHUNK_SIZE).contains(&d.chunk_size) {
            bail!("defaults.chunk_size must be within 1..={MAX_CHUNK_SIZE}, got {}", d.chunk_size);
        }
        if d.chunk_overlap > MAX_CHUNK_OVERLAP {
            bail!(
                "defaults.chunk_overlap must be within 0..={MAX_CHUNK_OVERLAP}, got {}",
                d.chunk_overlap
            );
        }
        if d.chunk_overlap >= d.chunk_size {
            bail!(
                "defaults.chunk_overlap ({}) must be smaller than defaults.chunk_size ({})",
                d.chunk_overlap,
                d.chunk_size
            );
        }
        if !(1..=MAX_TOP_K).contains(&d.top_k) {
            bail!("defaults.top_k must be within 1..={MAX_TOP_K}, got {}", d.top_k);
        }
        if !(0.0..=MAX_TEMPERATURE).contains(&d.temperature) {
            bail!(
                "defaults.temperature must be within 0.0..={MAX_TEMPERATURE}, got {}",
                d.temperature
            );
        }
        if self.index.collection.trim().is_empty() {
            bail!("index.collection must not be empty");
        }
        Ok(())
    }

    /// Resolve credentials through the vault.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault backend fails.
    pub async fn resolve_secrets(&mut self, vault: &dyn VaultProvider) -> anyhow::Result<()> {
        if let Some(val) = vault.get_secret("LORE_OPENAI_API_KEY").await? {
            self.secrets.openai_api_key = Some(Secret::new(val));
        }
        if let Some(val) = vault.get_secret("LORE_QDRANT_API_KEY").await? {
            self.secrets.qdrant_api_key = Some(Secret::new(val));
        }
        if let Some(val) = vault.get_secret("LORE_GATEWAY_TOKEN").await? {
            self.secrets.gateway_token = Some(Secret::new(val));
        }
        Ok(())
    }
}

/// Priority: explicit `--config` > `LORE_CONFIG` env > `config/default.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("LORE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}
