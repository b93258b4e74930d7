//! Field bags — the extraction service's guesses before normalization.
//!
//! Every field is optional: OCR may miss anything. Presence is explicit so the
//! normalizer can report exactly which field was absent or malformed.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Receipt-level fields plus the line items, as extracted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReceipt {
  pub merchant_name:    Option<String>,
  pub merchant_address: Option<String>,
  pub merchant_phone:   Option<String>,
  pub transaction_date: Option<String>,
  pub subtotal:         Option<String>,
  pub tax:              Option<String>,
  pub total:            Option<String>,
  #[serde(default)]
  pub items:            Vec<RawLineItem>,
}

/// One extracted line item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLineItem {
  pub description: Option<String>,
  pub quantity:    Option<String>,
  pub unit_price:  Option<String>,
  pub total_price: Option<String>,
}

impl RawLineItem {
  pub fn new(description: &str, quantity: &str, unit_price: &str, total_price: &str) -> Self {
    Self {
      description: Some(description.to_owned()),
      quantity:    Some(quantity.to_owned()),
      unit_price:  Some(unit_price.to_owned()),
      total_price: Some(total_price.to_owned()),
    }
  }
}

/// Where the JSON dump of an image's field bag lives: `<stem>_output.json`
/// next to the image.
pub fn sidecar_path(image: &Path) -> PathBuf {
  let stem = image
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default();
  image.with_file_name(format!("{stem}_output.json"))
}
