//! Layered configuration: defaults, then an optional TOML file, then
//! `TALLY_`-prefixed environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use tally_azure::AzureConfig;
use tally_core::{extract::RetryPolicy, normalize::NormalizeConfig, resolve::DEFAULT_RESOLVE_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
  /// Call Azure Document Intelligence.
  Azure,
  /// Re-read `<stem>_output.json` field bags from an earlier run.
  Replay,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub input_dir:        PathBuf,
  pub store_path:       PathBuf,
  pub workers:          usize,
  pub write_sidecars:   bool,
  pub extractor:        ExtractorKind,
  pub normalize:        NormalizeConfig,
  pub retry:            RetryPolicy,
  pub resolve_attempts: u32,
  pub azure:            AzureConfig,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      input_dir:        PathBuf::from("data/receipts"),
      store_path:       PathBuf::from("data/receipt_database.db"),
      workers:          1,
      write_sidecars:   true,
      extractor:        ExtractorKind::Azure,
      normalize:        NormalizeConfig::default(),
      retry:            RetryPolicy::default(),
      resolve_attempts: DEFAULT_RESOLVE_ATTEMPTS,
      azure:            AzureConfig::default(),
    }
  }
}

impl AppConfig {
  /// Load from `path` (if it exists) and the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("TALLY").separator("__"))
      .build()
      .context("failed to read config file")?;

    let mut cfg: Self = settings
      .try_deserialize()
      .context("failed to deserialise AppConfig")?;
    cfg.apply_azure_env();
    cfg.input_dir = expand_tilde(&cfg.input_dir);
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }

  /// Fall back to the variable names the Azure SDKs document.
  fn apply_azure_env(&mut self) {
    if self.azure.endpoint.is_empty()
      && let Ok(endpoint) = std::env::var("AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT")
    {
      self.azure.endpoint = endpoint;
    }
    if self.azure.api_key.is_empty()
      && let Ok(key) = std::env::var("AZURE_DOCUMENT_INTELLIGENCE_KEY")
    {
      self.azure.api_key = key;
    }
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
