//! Rows produced by the read-only reporting views.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// Receipt count and spend per merchant, highest spend first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MerchantSummary {
  pub merchant:    String,
  pub receipts:    u64,
  pub total_spent: Decimal,
}

/// How often a product appears across all receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductFrequency {
  pub description: String,
  pub purchases:   u64,
  pub total_spent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlySpending {
  /// `YYYY-MM`.
  pub month:       String,
  pub merchant:    String,
  pub receipts:    u64,
  pub total_spent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySpending {
  pub date:        NaiveDate,
  pub receipts:    u64,
  pub total_spent: Decimal,
}
