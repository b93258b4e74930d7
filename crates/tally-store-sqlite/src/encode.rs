//! Encoding and decoding helpers between domain types and the plain
//! representations stored in SQLite columns.
//!
//! Money is stored as integer cents, quantities as canonical decimal strings,
//! calendar dates as `YYYY-MM-DD` and timestamps as RFC 3339 strings.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, prelude::ToPrimitive as _};
use tally_core::{
  normalize::to_money,
  receipt::{Receipt, ReceiptItem, ReceiptSource},
};

use crate::{Error, Result};

// ─── Money ───────────────────────────────────────────────────────────────────

pub fn encode_cents(amount: Decimal) -> Result<i64> {
  to_money(amount)
    .checked_mul(Decimal::ONE_HUNDRED)
    .and_then(|cents| cents.to_i64())
    .ok_or(Error::AmountOutOfRange(amount))
}

pub fn decode_cents(cents: i64) -> Decimal { Decimal::new(cents, 2) }

// ─── Quantity ────────────────────────────────────────────────────────────────

pub fn encode_quantity(q: Decimal) -> String { q.normalize().to_string() }

pub fn decode_quantity(s: &str) -> Result<Decimal> { Ok(s.parse()?) }

// ─── Dates ───────────────────────────────────────────────────────────────────

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `receipt` row.
pub struct ReceiptRow {
  pub receipt_id:       i64,
  pub merchant_id:      i64,
  pub transaction_date: String,
  pub subtotal_cents:   Option<i64>,
  pub tax_cents:        Option<i64>,
  pub total_cents:      i64,
  pub needs_review:     bool,
  pub source_path:      Option<String>,
  pub source_digest:    Option<String>,
  pub created_at:       String,
}

impl ReceiptRow {
  pub fn into_receipt(self) -> Result<Receipt> {
    let source = match (self.source_path, self.source_digest) {
      (Some(path), Some(digest)) => Some(ReceiptSource { path, digest }),
      _ => None,
    };

    Ok(Receipt {
      receipt_id: self.receipt_id,
      merchant_id: self.merchant_id,
      transaction_date: decode_date(&self.transaction_date)?,
      subtotal: self.subtotal_cents.map(decode_cents),
      tax: self.tax_cents.map(decode_cents),
      total: decode_cents(self.total_cents),
      needs_review: self.needs_review,
      source,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw values read directly from a `receipt_item` row.
pub struct ReceiptItemRow {
  pub receipt_item_id:  i64,
  pub receipt_id:       i64,
  pub product_id:       i64,
  pub line_no:          u32,
  pub quantity:         String,
  pub unit_price_cents: i64,
  pub total_cents:      i64,
  pub needs_review:     bool,
}

impl ReceiptItemRow {
  pub fn into_item(self) -> Result<ReceiptItem> {
    Ok(ReceiptItem {
      receipt_item_id: self.receipt_item_id,
      receipt_id:      self.receipt_id,
      product_id:      self.product_id,
      line_no:         self.line_no,
      quantity:        decode_quantity(&self.quantity)?,
      unit_price:      decode_cents(self.unit_price_cents),
      total_price:     decode_cents(self.total_cents),
      needs_review:    self.needs_review,
    })
  }
}
