//! REST client for Document Intelligence's analyze operation.

use std::{path::Path, time::Duration};

use reqwest::{Client, Response, StatusCode, header};
use serde::Deserialize;
use tally_core::{Error, Result, extract::Extractor, raw::RawReceipt};
use tracing::{debug, instrument};

use crate::model::AnalyzeOperation;

const SUBSCRIPTION_KEY: &str = "Ocp-Apim-Subscription-Key";

/// Connection settings for the Document Intelligence resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
  /// e.g. `https://my-resource.cognitiveservices.azure.com`
  pub endpoint:         String,
  pub api_key:          String,
  pub model_id:         String,
  pub api_version:      String,
  pub poll_interval_ms: u64,
  /// Give up on an operation still running after this many polls.
  pub max_polls:        u32,
}

impl Default for AzureConfig {
  fn default() -> Self {
    Self {
      endpoint:         String::new(),
      api_key:          String::new(),
      model_id:         "prebuilt-receipt".into(),
      api_version:      "2024-11-30".into(),
      poll_interval_ms: 1_000,
      max_polls:        60,
    }
  }
}

/// Extracts field bags with the `prebuilt-receipt` model.
///
/// Cheap to clone — the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct AzureExtractor {
  client: Client,
  config: AzureConfig,
}

impl AzureExtractor {
  pub fn new(config: AzureConfig) -> Result<Self> {
    if config.endpoint.is_empty() || config.api_key.is_empty() {
      return Err(Error::Configuration("azure endpoint and api_key must be configured".into()));
    }
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;
    Ok(Self { client, config })
  }

  pub fn analyze_url(&self) -> String {
    format!(
      "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
      self.config.endpoint.trim_end_matches('/'),
      self.config.model_id,
      self.config.api_version,
    )
  }

  /// `POST …:analyze`, returning the `Operation-Location` to poll.
  async fn submit(&self, image: &Path) -> Result<String> {
    let bytes = tokio::fs::read(image).await?;
    let resp = self
      .client
      .post(self.analyze_url())
      .header(SUBSCRIPTION_KEY, &self.config.api_key)
      .header(header::CONTENT_TYPE, "application/octet-stream")
      .body(bytes)
      .send()
      .await
      .map_err(unavailable)?;
    let resp = check_status(resp, "analyze").await?;

    resp
      .headers()
      .get("operation-location")
      .and_then(|v| v.to_str().ok())
      .map(str::to_owned)
      .ok_or_else(|| Error::ExtractionMalformed("analyze response has no Operation-Location".into()))
  }

  async fn poll(&self, location: &str) -> Result<AnalyzeOperation> {
    let interval = Duration::from_millis(self.config.poll_interval_ms);
    for poll in 1..=self.config.max_polls.max(1) {
      tokio::time::sleep(interval).await;

      let resp = self
        .client
        .get(location)
        .header(SUBSCRIPTION_KEY, &self.config.api_key)
        .send()
        .await
        .map_err(unavailable)?;
      let resp = check_status(resp, "poll").await?;
      let body = resp.bytes().await.map_err(unavailable)?;
      let op: AnalyzeOperation = serde_json::from_slice(&body)
        .map_err(|e| Error::ExtractionMalformed(format!("undecodable analyze result: {e}")))?;

      debug!(poll, status = %op.status, "polled analyze operation");
      if op.is_finished() {
        return Ok(op);
      }
    }
    Err(Error::ExtractionUnavailable(format!(
      "analyze operation still running after {} polls",
      self.config.max_polls
    )))
  }
}

impl Extractor for AzureExtractor {
  #[instrument(skip(self), fields(image = %image.display()))]
  async fn extract<'a>(&'a self, image: &'a Path) -> Result<RawReceipt> {
    let location = self.submit(image).await?;
    let op = self.poll(&location).await?;

    if op.status != "succeeded" {
      let detail = op.error.map(|e| e.to_string()).unwrap_or_default();
      return Err(Error::ExtractionMalformed(format!("analyze {}: {detail}", op.status)));
    }
    op.analyze_result
      .ok_or_else(|| Error::ExtractionMalformed("succeeded without analyzeResult".into()))?
      .into_raw_receipt()
  }
}

fn unavailable(e: reqwest::Error) -> Error { Error::ExtractionUnavailable(e.to_string()) }

/// Whether a failed request is worth repeating.
fn is_retryable(status: StatusCode) -> bool {
  status == StatusCode::REQUEST_TIMEOUT
    || status == StatusCode::TOO_MANY_REQUESTS
    || status.is_server_error()
}

async fn check_status(resp: Response, step: &str) -> Result<Response> {
  let status = resp.status();
  if status.is_success() {
    return Ok(resp);
  }
  let body = resp.text().await.unwrap_or_default();
  let message = format!("{step} → {status}: {body}");
  if is_retryable(status) {
    Err(Error::ExtractionUnavailable(message))
  } else {
    Err(Error::ExtractionMalformed(message))
  }
}
