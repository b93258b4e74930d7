//! Batch driver — many images, each an independent unit of work.
//!
//! A failing receipt is recorded as skipped and never stops the rest of the
//! batch. Images whose bytes were already ingested are skipped by digest.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::Arc,
};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::{
  sync::Semaphore,
  task::{self, JoinSet},
};
use tracing::{error, info, warn};

use crate::{
  Error, Result,
  extract::{Extractor, RetryPolicy, extract_with_retry},
  ingest::{Ingested, Ingestor},
  raw::{RawReceipt, sidecar_path},
  receipt::{ReceiptId, ReceiptSource},
  store::ReceiptStore,
};

#[derive(Debug, Clone)]
pub struct BatchOptions {
  /// Receipts processed concurrently.
  pub workers:        usize,
  pub retry:          RetryPolicy,
  /// Dump each extracted field bag next to its image.
  pub write_sidecars: bool,
}

impl Default for BatchOptions {
  fn default() -> Self { Self { workers: 1, retry: RetryPolicy::default(), write_sidecars: false } }
}

// ─── Summary ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
  AlreadyIngested { receipt_id: ReceiptId },
  Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestedFile {
  pub path:     PathBuf,
  pub attempts: u32,
  pub outcome:  Ingested,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
  pub path:   PathBuf,
  pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
  pub ingested: Vec<IngestedFile>,
  pub skipped:  Vec<SkippedFile>,
  /// Worker tasks that died and could not be matched to an image; should
  /// always be zero.
  pub lost:     usize,
}

impl BatchSummary {
  pub fn warning_count(&self) -> usize {
    self.ingested.iter().map(|f| f.outcome.warnings.len()).sum()
  }
}

enum FileOutcome {
  Ingested { attempts: u32, outcome: Ingested },
  AlreadyIngested(ReceiptId),
}

// ─── Runner ──────────────────────────────────────────────────────────────────

pub struct BatchRunner<E, S> {
  extractor: Arc<E>,
  ingestor:  Ingestor<S>,
  options:   BatchOptions,
}

impl<E, S> BatchRunner<E, S>
where
  E: Extractor + 'static,
  S: ReceiptStore + 'static,
{
  pub fn new(extractor: Arc<E>, ingestor: Ingestor<S>, options: BatchOptions) -> Self {
    Self { extractor, ingestor, options }
  }

  /// Process every image, at most `workers` at a time. Results are reported
  /// in input order.
  pub async fn run(&self, images: Vec<PathBuf>) -> BatchSummary {
    let permits = Arc::new(Semaphore::new(self.options.workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut pending: HashMap<task::Id, (usize, PathBuf)> = HashMap::new();

    for (index, image) in images.into_iter().enumerate() {
      let permits = Arc::clone(&permits);
      let extractor = Arc::clone(&self.extractor);
      let ingestor = self.ingestor.clone();
      let options = self.options.clone();
      let path = image.clone();

      let handle = tasks.spawn(async move {
        let _permit = permits.acquire_owned().await;
        let result = process_image(extractor.as_ref(), &ingestor, &options, &image).await;
        (index, image, result.map_err(|e| e.to_string()))
      });
      pending.insert(handle.id(), (index, path));
    }

    let mut done = Vec::new();
    let mut summary = BatchSummary::default();
    while let Some(joined) = tasks.join_next_with_id().await {
      match joined {
        Ok((id, entry)) => {
          pending.remove(&id);
          done.push(entry);
        }
        Err(e) => match pending.remove(&e.id()) {
          Some((index, path)) => {
            error!(path = %path.display(), error = %e, "batch worker terminated abnormally");
            done.push((index, path, Err(format!("worker terminated abnormally: {e}"))));
          }
          None => {
            error!(error = %e, "batch worker terminated abnormally");
            summary.lost += 1;
          }
        },
      }
    }
    done.sort_by_key(|(index, ..)| *index);

    for (_, path, result) in done {
      match result {
        Ok(FileOutcome::Ingested { attempts, outcome }) => {
          summary.ingested.push(IngestedFile { path, attempts, outcome });
        }
        Ok(FileOutcome::AlreadyIngested(receipt_id)) => {
          info!(path = %path.display(), receipt_id, "already ingested, skipping");
          summary.skipped.push(SkippedFile { path, reason: SkipReason::AlreadyIngested { receipt_id } });
        }
        Err(error) => {
          warn!(path = %path.display(), %error, "receipt skipped");
          summary.skipped.push(SkippedFile { path, reason: SkipReason::Failed { error } });
        }
      }
    }

    info!(
      ingested = summary.ingested.len(),
      skipped = summary.skipped.len(),
      lost = summary.lost,
      warnings = summary.warning_count(),
      "batch finished"
    );
    summary
  }
}

async fn process_image<E: Extractor, S: ReceiptStore>(
  extractor: &E,
  ingestor: &Ingestor<S>,
  options: &BatchOptions,
  image: &Path,
) -> Result<FileOutcome> {
  let digest = file_digest(image).await?;
  if let Some(receipt_id) = ingestor
    .store()
    .find_receipt_by_digest(digest.clone())
    .await
    .map_err(Error::from_store)?
  {
    return Ok(FileOutcome::AlreadyIngested(receipt_id));
  }

  let (raw, attempts) = extract_with_retry(extractor, image, &options.retry).await?;

  if options.write_sidecars
    && let Err(e) = write_sidecar(image, &raw).await
  {
    warn!(image = %image.display(), error = %e, "could not write field bag sidecar");
  }

  let source = ReceiptSource { path: image.display().to_string(), digest: digest.clone() };
  match ingestor.ingest_from(&raw, Some(source)).await {
    Ok(outcome) => Ok(FileOutcome::Ingested { attempts, outcome }),
    // An identical image in the same batch committed first.
    Err(Error::IntegrityViolation(e)) => match ingestor
      .store()
      .find_receipt_by_digest(digest)
      .await
      .map_err(Error::from_store)?
    {
      Some(receipt_id) => Ok(FileOutcome::AlreadyIngested(receipt_id)),
      None => Err(Error::IntegrityViolation(e)),
    },
    Err(e) => Err(e),
  }
}

/// Lowercase hex SHA-256 of a file's contents.
pub async fn file_digest(path: &Path) -> Result<String> {
  let bytes = tokio::fs::read(path).await?;
  Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Write `raw` as pretty JSON to the image's sidecar path.
pub async fn write_sidecar(image: &Path, raw: &RawReceipt) -> Result<PathBuf> {
  let path = sidecar_path(image);
  let json = serde_json::to_vec_pretty(raw)?;
  tokio::fs::write(&path, json).await?;
  Ok(path)
}
