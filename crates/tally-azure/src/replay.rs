//! Replays field bags saved by an earlier run.

use std::path::Path;

use tally_core::{
  Error, Result,
  extract::Extractor,
  raw::{RawReceipt, sidecar_path},
};

/// Reads `<stem>_output.json` beside each image instead of calling a service.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayExtractor;

impl Extractor for ReplayExtractor {
  async fn extract<'a>(&'a self, image: &'a Path) -> Result<RawReceipt> {
    let path = sidecar_path(image);
    let json = tokio::fs::read(&path)
      .await
      .map_err(|e| Error::ExtractionMalformed(format!("{}: {e}", path.display())))?;
    serde_json::from_slice(&json)
      .map_err(|e| Error::ExtractionMalformed(format!("{}: {e}", path.display())))
  }
}
