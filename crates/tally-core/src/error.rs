//! Error types for `tally-core`.

use thiserror::Error;

use crate::{
  receipt::ReferenceKind,
  store::{StoreError, StoreErrorKind},
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// The extraction service could not be reached; worth retrying.
  #[error("extraction service unavailable: {0}")]
  ExtractionUnavailable(String),

  /// The extraction service answered but produced nothing usable.
  #[error("extraction returned no usable structure: {0}")]
  ExtractionMalformed(String),

  /// Settings that no retry can fix.
  #[error("invalid configuration: {0}")]
  Configuration(String),

  #[error("malformed amount in {field}: {raw:?}")]
  MalformedAmount { field: &'static str, raw: String },

  #[error("unparseable date: {0:?}")]
  UnparseableDate(String),

  #[error("suspicious quantity: {0:?}")]
  SuspiciousQuantity(String),

  #[error("missing required field: {0}")]
  MissingField(&'static str),

  #[error("could not resolve {kind} {key:?} after {attempts} attempts")]
  ResolutionConflict {
    kind:     ReferenceKind,
    key:      String,
    attempts: u32,
  },

  #[error("integrity violation: {0}")]
  IntegrityViolation(#[source] BoxError),

  #[error("store error: {0}")]
  Store(#[source] BoxError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap a backend error, keeping constraint rejections distinguishable.
  pub fn from_store<E: StoreError>(err: E) -> Self {
    match err.kind() {
      StoreErrorKind::IntegrityViolation => Self::IntegrityViolation(Box::new(err)),
      StoreErrorKind::Other => Self::Store(Box::new(err)),
    }
  }

  /// Whether the operation that produced this error may succeed if repeated.
  pub fn is_transient(&self) -> bool { matches!(self, Self::ExtractionUnavailable(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
