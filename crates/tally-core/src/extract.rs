//! The extraction adapter boundary and its retry policy.

use std::{future::Future, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;

use crate::{Result, raw::RawReceipt};

/// Turns a receipt image into a raw field bag.
///
/// Implementations report a transient outage as
/// [`Error::ExtractionUnavailable`](crate::Error::ExtractionUnavailable) and
/// an unusable answer as
/// [`Error::ExtractionMalformed`](crate::Error::ExtractionMalformed).
pub trait Extractor: Send + Sync {
  fn extract<'a>(
    &'a self,
    image: &'a Path,
  ) -> impl Future<Output = Result<RawReceipt>> + Send + 'a;
}

/// Bounded exponential backoff for transient extraction failures.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts including the first.
  pub max_attempts:  u32,
  pub base_delay_ms: u64,
  pub max_delay_ms:  u64,
}

impl Default for RetryPolicy {
  fn default() -> Self { Self { max_attempts: 3, base_delay_ms: 500, max_delay_ms: 30_000 } }
}

impl RetryPolicy {
  /// No retries at all.
  pub fn none() -> Self { Self { max_attempts: 1, ..Self::default() } }

  /// Delay before attempt `attempt + 1`, doubling from the base delay.
  pub fn delay_after(&self, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
  }
}

/// Run `extractor`, retrying transient failures according to `policy`.
///
/// Returns the field bag and the number of attempts it took.
pub async fn extract_with_retry<E: Extractor>(
  extractor: &E,
  image: &Path,
  policy: &RetryPolicy,
) -> Result<(RawReceipt, u32)> {
  let max_attempts = policy.max_attempts.max(1);
  let mut attempt = 1;
  loop {
    match extractor.extract(image).await {
      Ok(raw) => return Ok((raw, attempt)),
      Err(e) if e.is_transient() && attempt < max_attempts => {
        let delay = policy.delay_after(attempt);
        warn!(image = %image.display(), attempt, ?delay, error = %e, "extraction failed, retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}
