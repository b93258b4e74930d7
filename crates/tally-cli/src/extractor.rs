use std::path::Path;

use tally_azure::{AzureExtractor, ReplayExtractor};
use tally_core::{Result, extract::Extractor, raw::RawReceipt};

use crate::settings::{AppConfig, ExtractorKind};

/// The extractor selected by configuration.
pub enum AnyExtractor {
  Azure(AzureExtractor),
  Replay(ReplayExtractor),
}

impl AnyExtractor {
  pub fn from_config(cfg: &AppConfig) -> Result<Self> {
    Ok(match cfg.extractor {
      ExtractorKind::Azure => Self::Azure(AzureExtractor::new(cfg.azure.clone())?),
      ExtractorKind::Replay => Self::Replay(ReplayExtractor),
    })
  }

  /// Replayed field bags already live in their sidecars.
  pub fn writes_sidecars(&self) -> bool { matches!(self, Self::Azure(_)) }
}

impl Extractor for AnyExtractor {
  async fn extract<'a>(&'a self, image: &'a Path) -> Result<RawReceipt> {
    match self {
      Self::Azure(e) => e.extract(image).await,
      Self::Replay(e) => e.extract(image).await,
    }
  }
}
