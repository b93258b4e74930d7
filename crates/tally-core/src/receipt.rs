//! Normalized and persisted receipt types.
//!
//! Money is always a [`Decimal`] with a scale of 2. Identifiers are the
//! store's integer row ids.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type ReferenceId = i64;
pub type ReceiptId = i64;

// ─── Reference data ──────────────────────────────────────────────────────────

/// The two kinds of slowly-changing reference entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
  Merchant,
  Product,
}

impl fmt::Display for ReferenceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Merchant => f.write_str("merchant"),
      Self::Product => f.write_str("product"),
    }
  }
}

/// A merchant name or product description after whitespace and case folding.
///
/// `key` is what uniqueness is decided on; `display` keeps the extracted
/// casing for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
  pub key:     String,
  pub display: String,
}

/// A reference row to create if its natural key is not yet known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReference {
  pub kind:     ReferenceKind,
  pub key:      NaturalKey,
  /// Merchant only.
  pub address:  Option<String>,
  /// Merchant only.
  pub phone:    Option<String>,
  /// Product only.
  pub category: Option<String>,
}

impl NewReference {
  pub fn new(kind: ReferenceKind, key: NaturalKey) -> Self {
    Self { kind, key, address: None, phone: None, category: None }
  }
}

// ─── Normalized receipt ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedLine {
  /// 1-based position on the printed receipt.
  pub line_no:      u32,
  pub product:      NaturalKey,
  pub quantity:     Decimal,
  pub unit_price:   Decimal,
  pub total_price:  Decimal,
  pub needs_review: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedReceipt {
  pub merchant:         NaturalKey,
  pub merchant_address: Option<String>,
  pub merchant_phone:   Option<String>,
  pub transaction_date: NaiveDate,
  pub subtotal:         Option<Decimal>,
  pub tax:              Option<Decimal>,
  pub total:            Decimal,
  pub lines:            Vec<NormalizedLine>,
  pub needs_review:     bool,
}

// ─── Warnings ────────────────────────────────────────────────────────────────

/// A field-level problem that degraded a value instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum FieldIssue {
  MalformedAmount { field: &'static str, raw: String },
  MissingAmount { field: &'static str },
  UnparseableQuantity { raw: String },
  SuspiciousQuantity { raw: String },
  MissingDescription,
  LineTotalMismatch { computed: Decimal, extracted: Decimal },
  SubtotalMismatch { computed: Decimal, extracted: Decimal },
  TotalMismatch { computed: Decimal, extracted: Decimal },
  /// Checking or deriving `field` exceeded the decimal range.
  ArithmeticOverflow { field: &'static str },
  NoLineItems,
}

impl fmt::Display for FieldIssue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::MalformedAmount { field, raw } => write!(f, "malformed {field}: {raw:?}"),
      Self::MissingAmount { field } => write!(f, "missing {field}"),
      Self::UnparseableQuantity { raw } => write!(f, "unparseable quantity {raw:?}, assumed 1"),
      Self::SuspiciousQuantity { raw } => write!(f, "negative quantity {raw:?}, clamped to 0"),
      Self::MissingDescription => f.write_str("line item without description skipped"),
      Self::LineTotalMismatch { computed, extracted } => {
        write!(f, "quantity * unit price = {computed}, line total = {extracted}")
      }
      Self::SubtotalMismatch { computed, extracted } => {
        write!(f, "line totals sum to {computed}, subtotal = {extracted}")
      }
      Self::TotalMismatch { computed, extracted } => {
        write!(f, "subtotal + tax = {computed}, total = {extracted}")
      }
      Self::ArithmeticOverflow { field } => write!(f, "{field} out of range, not checked"),
      Self::NoLineItems => f.write_str("receipt has no line items"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
  /// `None` for receipt-level fields.
  pub line:  Option<u32>,
  pub issue: FieldIssue,
}

impl fmt::Display for Warning {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.line {
      Some(n) => write!(f, "line {n}: {}", self.issue),
      None => write!(f, "{}", self.issue),
    }
  }
}

// ─── Writes ──────────────────────────────────────────────────────────────────

/// The image a receipt was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSource {
  pub path:   String,
  /// Lowercase hex SHA-256 of the image bytes.
  pub digest: String,
}

/// A receipt header with its items, written as one unit of work.
#[derive(Debug, Clone)]
pub struct NewReceipt {
  pub merchant_id:      ReferenceId,
  pub transaction_date: NaiveDate,
  pub subtotal:         Option<Decimal>,
  pub tax:              Option<Decimal>,
  pub total:            Decimal,
  pub needs_review:     bool,
  pub source:           Option<ReceiptSource>,
  pub items:            Vec<NewReceiptItem>,
}

#[derive(Debug, Clone)]
pub struct NewReceiptItem {
  pub line_no:      u32,
  pub product_id:   ReferenceId,
  pub quantity:     Decimal,
  pub unit_price:   Decimal,
  pub total_price:  Decimal,
  pub needs_review: bool,
}

// ─── Reads ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
  pub receipt_id:       ReceiptId,
  pub merchant_id:      ReferenceId,
  pub transaction_date: NaiveDate,
  pub subtotal:         Option<Decimal>,
  pub tax:              Option<Decimal>,
  pub total:            Decimal,
  pub needs_review:     bool,
  pub source:           Option<ReceiptSource>,
  pub created_at:       DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptItem {
  pub receipt_item_id: i64,
  pub receipt_id:      ReceiptId,
  pub product_id:      ReferenceId,
  pub line_no:         u32,
  pub quantity:        Decimal,
  pub unit_price:      Decimal,
  pub total_price:     Decimal,
  pub needs_review:    bool,
}
