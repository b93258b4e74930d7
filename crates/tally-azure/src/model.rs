//! Wire types for the Document Intelligence analyze operation, and their
//! mapping onto a [`RawReceipt`].

use std::collections::HashMap;

use serde::Deserialize;
use tally_core::{
  Error, Result,
  raw::{RawLineItem, RawReceipt},
};

/// Body of `GET {Operation-Location}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeOperation {
  /// `notStarted`, `running`, `succeeded`, `failed` or `canceled`.
  pub status:         String,
  #[serde(default)]
  pub analyze_result: Option<AnalyzeResult>,
  #[serde(default)]
  pub error:          Option<serde_json::Value>,
}

impl AnalyzeOperation {
  pub fn is_finished(&self) -> bool {
    matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
  #[serde(default)]
  pub model_id:  Option<String>,
  #[serde(default)]
  pub documents: Vec<AnalyzedDocument>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedDocument {
  #[serde(default)]
  pub doc_type:   Option<String>,
  #[serde(default)]
  pub fields:     HashMap<String, DocumentField>,
  #[serde(default)]
  pub confidence: Option<f64>,
}

/// One recognised field. Only `content` (the text as printed) is used;
/// typed values are ignored so the normalizer sees exactly what OCR read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentField {
  #[serde(default, rename = "type")]
  pub kind:         Option<String>,
  #[serde(default)]
  pub content:      Option<String>,
  #[serde(default)]
  pub value_array:  Vec<DocumentField>,
  #[serde(default)]
  pub value_object: HashMap<String, DocumentField>,
  #[serde(default)]
  pub confidence:   Option<f64>,
}

fn content(fields: &HashMap<String, DocumentField>, name: &str) -> Option<String> {
  fields
    .get(name)
    .and_then(|f| f.content.as_deref())
    .map(str::trim)
    .filter(|c| !c.is_empty())
    .map(str::to_owned)
}

impl AnalyzeResult {
  /// Map the first analyzed document onto a field bag.
  pub fn into_raw_receipt(self) -> Result<RawReceipt> {
    let document = self
      .documents
      .into_iter()
      .next()
      .ok_or_else(|| Error::ExtractionMalformed("no documents in analyze result".into()))?;
    Ok(document.into_raw_receipt())
  }
}

impl AnalyzedDocument {
  pub fn into_raw_receipt(self) -> RawReceipt {
    let fields = &self.fields;
    let items = fields
      .get("Items")
      .map(|items| {
        items
          .value_array
          .iter()
          .map(|item| {
            let o = &item.value_object;
            RawLineItem {
              description: content(o, "Description"),
              quantity:    content(o, "Quantity"),
              unit_price:  content(o, "Price"),
              total_price: content(o, "TotalPrice"),
            }
          })
          .collect()
      })
      .unwrap_or_default();

    RawReceipt {
      merchant_name: content(fields, "MerchantName"),
      merchant_address: content(fields, "MerchantAddress"),
      merchant_phone: content(fields, "MerchantPhoneNumber"),
      transaction_date: content(fields, "TransactionDate"),
      subtotal: content(fields, "Subtotal"),
      tax: content(fields, "TotalTax"),
      total: content(fields, "Total"),
      items,
    }
  }
}
