//! Error type for `tally-store-sqlite`.

use rust_decimal::Decimal;
use tally_core::store::{StoreError, StoreErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// SQLite rejected a write because of a UNIQUE, FOREIGN KEY or CHECK
  /// constraint.
  #[error("constraint violation: {0}")]
  Constraint(#[source] tokio_rusqlite::Error),

  #[error("database error: {0}")]
  Database(#[source] tokio_rusqlite::Error),

  #[error("amount does not fit in integer cents: {0}")]
  AmountOutOfRange(Decimal),

  #[error("decimal parse error: {0}")]
  Decimal(#[from] rust_decimal::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),
}

impl From<tokio_rusqlite::Error> for Error {
  fn from(err: tokio_rusqlite::Error) -> Self {
    if is_constraint_violation(&err) {
      Self::Constraint(err)
    } else {
      Self::Database(err)
    }
  }
}

fn is_constraint_violation(err: &tokio_rusqlite::Error) -> bool {
  matches!(
    err,
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(failure, _))
      if failure.code == rusqlite::ErrorCode::ConstraintViolation
  )
}

impl StoreError for Error {
  fn kind(&self) -> StoreErrorKind {
    match self {
      Self::Constraint(_) => StoreErrorKind::IntegrityViolation,
      _ => StoreErrorKind::Other,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
