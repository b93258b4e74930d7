//! Field normalization — raw extracted strings to canonical typed values.
//!
//! Everything here is pure: the same [`RawReceipt`] always normalizes to the
//! same [`Normalized`] output. Receipt-level failures (no merchant, no usable
//! date, no usable total) are errors; everything else degrades the field or
//! the line and is reported as a [`Warning`].

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  raw::{RawLineItem, RawReceipt},
  receipt::{FieldIssue, NaturalKey, NormalizedLine, NormalizedReceipt, Warning},
};

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹'];

static AMOUNT_TOKEN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"-?(?:\d[\d,]*(?:\.\d+)?|\.\d+)").expect("valid amount pattern"));

static QUANTITY_TOKEN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"-?(?:\d+(?:\.\d+)?|\.\d+)").expect("valid quantity pattern"));

// ─── Configuration ───────────────────────────────────────────────────────────

/// Tunables for [`Normalizer`]. Deserialised from the `[normalize]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
  /// `chrono` format strings, tried in order.
  pub date_formats:      Vec<String>,
  /// Largest difference still accepted by the arithmetic cross-checks.
  pub tolerance:         Decimal,
  /// Reject the whole receipt when a line cannot be priced, instead of
  /// keeping a zero-quantity placeholder.
  pub strict_line_items: bool,
}

impl Default for NormalizeConfig {
  fn default() -> Self {
    Self {
      date_formats:      ["%m/%d/%Y", "%Y-%m-%d", "%m-%d-%Y", "%m/%d/%y", "%m-%d-%y", "%d-%m-%Y", "%Y/%m/%d"]
        .into_iter()
        .map(str::to_owned)
        .collect(),
      tolerance:         Decimal::new(1, 2),
      strict_line_items: false,
    }
  }
}

// ─── Field-level functions ───────────────────────────────────────────────────

/// Round to cents, half away from zero, with the scale fixed at 2.
pub fn to_money(value: Decimal) -> Decimal {
  let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
  rounded.rescale(2);
  rounded
}

/// Parse a price such as `"$12,345.6"`, `"0.29/EA"` or `"-1.50"`.
///
/// Currency symbols, whitespace and thousands separators are ignored; the
/// first numeric token wins.
pub fn normalize_amount(field: &'static str, raw: &str) -> Result<Decimal> {
  let malformed = || Error::MalformedAmount { field, raw: raw.to_owned() };

  let cleaned: String = raw
    .chars()
    .filter(|c| !c.is_whitespace() && !CURRENCY_SYMBOLS.contains(c))
    .collect();
  let token = AMOUNT_TOKEN.find(&cleaned).ok_or_else(malformed)?;
  let value: Decimal = token.as_str().replace(',', "").parse().map_err(|_| malformed())?;

  Ok(to_money(value))
}

/// A parsed quantity plus the issue encountered while parsing, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantity {
  pub value: Decimal,
  pub issue: Option<FieldIssue>,
}

/// Parse `"2"`, `"3EA"` or `"0.41 lb"`.
///
/// Absent → 1. Unparseable → 1 with a warning. Negative → 0 with a warning.
pub fn normalize_quantity(raw: Option<&str>) -> Quantity {
  let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
    return Quantity { value: Decimal::ONE, issue: None };
  };

  let parsed = QUANTITY_TOKEN
    .find(raw)
    .and_then(|m| m.as_str().parse::<Decimal>().ok());

  match parsed {
    None => Quantity {
      value: Decimal::ONE,
      issue: Some(FieldIssue::UnparseableQuantity { raw: raw.to_owned() }),
    },
    Some(v) if v.is_sign_negative() && !v.is_zero() => Quantity {
      value: Decimal::ZERO,
      issue: Some(FieldIssue::SuspiciousQuantity { raw: raw.to_owned() }),
    },
    Some(v) => Quantity { value: v.normalize(), issue: None },
  }
}

/// Parse a date against `formats` in order, yielding the first plausible
/// match.
///
/// Years outside 1900..=2999 are discarded so `%Y` cannot swallow a two-digit
/// year meant for `%y`.
pub fn normalize_date(raw: &str, formats: &[String]) -> Result<NaiveDate> {
  let trimmed = raw.trim();
  formats
    .iter()
    .filter_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
    .find(|d| (1900..=2999).contains(&d.year()))
    .ok_or_else(|| Error::UnparseableDate(raw.to_owned()))
}

/// Trim and collapse internal whitespace runs. `None` if nothing remains.
pub fn collapse_whitespace(raw: &str) -> Option<String> {
  let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
  (!collapsed.is_empty()).then_some(collapsed)
}

/// Fold a merchant name or product description into its natural key.
pub fn normalize_name(raw: &str) -> Option<NaturalKey> {
  let display = collapse_whitespace(raw)?;
  Some(NaturalKey { key: display.to_uppercase(), display })
}

// ─── Receipt normalization ───────────────────────────────────────────────────

/// A normalized receipt with the warnings collected on the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Normalized {
  pub receipt:  NormalizedReceipt,
  pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
  config: NormalizeConfig,
}

impl Normalizer {
  pub fn new(config: NormalizeConfig) -> Self { Self { config } }

  pub fn config(&self) -> &NormalizeConfig { &self.config }

  pub fn normalize(&self, raw: &RawReceipt) -> Result<Normalized> {
    let merchant = raw
      .merchant_name
      .as_deref()
      .and_then(normalize_name)
      .ok_or(Error::MissingField("merchant_name"))?;

    let date_raw = raw
      .transaction_date
      .as_deref()
      .ok_or(Error::MissingField("transaction_date"))?;
    let transaction_date = normalize_date(date_raw, &self.config.date_formats)?;

    let total_raw = raw.total.as_deref().ok_or(Error::MissingField("total"))?;
    let total = normalize_amount("total", total_raw)?;

    let mut warnings = Vec::new();
    let subtotal = optional_amount("subtotal", raw.subtotal.as_deref(), None, &mut warnings);
    let tax = optional_amount("tax", raw.tax.as_deref(), None, &mut warnings);

    let mut lines = Vec::with_capacity(raw.items.len());
    for (idx, item) in raw.items.iter().enumerate() {
      let line_no = idx as u32 + 1;
      if let Some(line) = self.normalize_line(line_no, item, &mut warnings)? {
        lines.push(line);
      }
    }

    if raw.items.is_empty() {
      warnings.push(Warning { line: None, issue: FieldIssue::NoLineItems });
    }

    if let Some(subtotal) = subtotal
      && !lines.is_empty()
    {
      let sum = lines
        .iter()
        .try_fold(Decimal::ZERO, |acc, l| acc.checked_add(l.total_price));
      let issue = match sum {
        None => Some(FieldIssue::ArithmeticOverflow { field: "subtotal" }),
        Some(computed) if !self.within_tolerance(computed, subtotal) => {
          Some(FieldIssue::SubtotalMismatch { computed, extracted: subtotal })
        }
        Some(_) => None,
      };
      if let Some(issue) = issue {
        warnings.push(Warning { line: None, issue });
      }
    }

    if let Some(subtotal) = subtotal {
      let issue = match subtotal.checked_add(tax.unwrap_or(Decimal::ZERO)) {
        None => Some(FieldIssue::ArithmeticOverflow { field: "total" }),
        Some(computed) if !self.within_tolerance(computed, total) => {
          Some(FieldIssue::TotalMismatch { computed: to_money(computed), extracted: total })
        }
        Some(_) => None,
      };
      if let Some(issue) = issue {
        warnings.push(Warning { line: None, issue });
      }
    }

    let receipt = NormalizedReceipt {
      merchant,
      merchant_address: raw.merchant_address.as_deref().and_then(collapse_whitespace),
      merchant_phone: raw.merchant_phone.as_deref().and_then(collapse_whitespace),
      transaction_date,
      subtotal,
      tax,
      total,
      lines,
      needs_review: !warnings.is_empty(),
    };

    Ok(Normalized { receipt, warnings })
  }

  fn normalize_line(
    &self,
    line_no: u32,
    item: &RawLineItem,
    warnings: &mut Vec<Warning>,
  ) -> Result<Option<NormalizedLine>> {
    let before = warnings.len();

    let Some(product) = item.description.as_deref().and_then(normalize_name) else {
      warnings.push(Warning { line: Some(line_no), issue: FieldIssue::MissingDescription });
      return Ok(None);
    };

    let quantity = normalize_quantity(item.quantity.as_deref());
    if let Some(issue) = quantity.issue {
      if self.config.strict_line_items
        && let FieldIssue::SuspiciousQuantity { raw } = &issue
      {
        return Err(Error::SuspiciousQuantity(raw.clone()));
      }
      warnings.push(Warning { line: Some(line_no), issue });
    }
    let qty = quantity.value;

    let unit = optional_amount("unit_price", item.unit_price.as_deref(), Some(line_no), warnings);
    let total = optional_amount("total_price", item.total_price.as_deref(), Some(line_no), warnings);

    let priced = match (unit, total) {
      (Some(unit), Some(total)) => match qty.checked_mul(unit).map(to_money) {
        Some(computed) => {
          if !self.within_tolerance(computed, total) {
            warnings.push(Warning {
              line:  Some(line_no),
              issue: FieldIssue::LineTotalMismatch { computed, extracted: total },
            });
          }
          Ok((qty, unit, total))
        }
        None => Err(FieldIssue::ArithmeticOverflow { field: "total_price" }),
      },
      (None, Some(total)) if qty.is_zero() => Ok((qty, total, total)),
      (None, Some(total)) => total
        .checked_div(qty)
        .map(|unit| (qty, to_money(unit), total))
        .ok_or(FieldIssue::ArithmeticOverflow { field: "unit_price" }),
      (Some(unit), None) => qty
        .checked_mul(unit)
        .map(|total| (qty, unit, to_money(total)))
        .ok_or(FieldIssue::ArithmeticOverflow { field: "total_price" }),
      (None, None) => Err(FieldIssue::MissingAmount { field: "total_price" }),
    };

    let (quantity, unit_price, total_price) = match priced {
      Ok(priced) => priced,
      Err(issue) => {
        if self.config.strict_line_items {
          return Err(Error::MalformedAmount {
            field: "total_price",
            raw:   item.total_price.clone().unwrap_or_default(),
          });
        }
        warnings.push(Warning { line: Some(line_no), issue });
        (Decimal::ZERO, to_money(Decimal::ZERO), to_money(Decimal::ZERO))
      }
    };

    Ok(Some(NormalizedLine {
      line_no,
      product,
      quantity,
      unit_price,
      total_price,
      needs_review: warnings.len() > before,
    }))
  }

  fn within_tolerance(&self, computed: Decimal, extracted: Decimal) -> bool {
    computed
      .checked_sub(extracted)
      .is_some_and(|diff| diff.abs() <= self.config.tolerance)
  }
}

/// Parse an optional amount, downgrading a malformed value to `None` with a
/// warning.
fn optional_amount(
  field: &'static str,
  raw: Option<&str>,
  line: Option<u32>,
  warnings: &mut Vec<Warning>,
) -> Option<Decimal> {
  let raw = raw.map(str::trim).filter(|r| !r.is_empty())?;
  match normalize_amount(field, raw) {
    Ok(v) => Some(v),
    Err(_) => {
      warnings.push(Warning {
        line,
        issue: FieldIssue::MalformedAmount { field, raw: raw.to_owned() },
      });
      None
    }
  }
}
