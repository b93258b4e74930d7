//! The receipt ingestor — one call per physical receipt.
//!
//! Normalize, resolve the merchant and every product, then hand the header
//! and items to the store as a single unit of work. Reference resolution
//! happens before the receipt transaction so that transaction stays short.

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use tracing::{info, instrument};

use crate::{
  Error, Result,
  normalize::Normalizer,
  raw::RawReceipt,
  receipt::{
    NewReceipt, NewReceiptItem, NewReference, ReceiptId, ReceiptSource, ReferenceId,
    ReferenceKind, Warning,
  },
  resolve::{DEFAULT_RESOLVE_ATTEMPTS, Resolver},
  store::ReceiptStore,
};

/// The outcome of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct Ingested {
  pub receipt_id:   ReceiptId,
  pub merchant_id:  ReferenceId,
  pub items:        usize,
  pub needs_review: bool,
  pub warnings:     Vec<Warning>,
}

/// Writes receipts into a [`ReceiptStore`].
///
/// Holds no mutable state; cloning is cheap and clones may ingest
/// concurrently.
pub struct Ingestor<S> {
  store:            Arc<S>,
  normalizer:       Arc<Normalizer>,
  resolve_attempts: u32,
}

impl<S> Clone for Ingestor<S> {
  fn clone(&self) -> Self {
    Self {
      store:            Arc::clone(&self.store),
      normalizer:       Arc::clone(&self.normalizer),
      resolve_attempts: self.resolve_attempts,
    }
  }
}

impl<S: ReceiptStore> Ingestor<S> {
  pub fn new(store: Arc<S>, normalizer: Normalizer) -> Self {
    Self {
      store,
      normalizer: Arc::new(normalizer),
      resolve_attempts: DEFAULT_RESOLVE_ATTEMPTS,
    }
  }

  pub fn with_resolve_attempts(mut self, attempts: u32) -> Self {
    self.resolve_attempts = attempts;
    self
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Ingest one receipt with no recorded source image.
  pub async fn ingest(&self, raw: &RawReceipt) -> Result<Ingested> {
    self.ingest_from(raw, None).await
  }

  /// Ingest one receipt, remembering the image it was read from.
  ///
  /// Either the header and all of its items are committed, or nothing is.
  #[instrument(skip_all, fields(source = source.as_ref().map(|s| s.path.as_str())))]
  pub async fn ingest_from(
    &self,
    raw: &RawReceipt,
    source: Option<ReceiptSource>,
  ) -> Result<Ingested> {
    let normalized = self.normalizer.normalize(raw)?;
    let receipt = normalized.receipt;
    let resolver = Resolver::new(self.store.as_ref()).with_max_attempts(self.resolve_attempts);

    let merchant_id = resolver
      .resolve_reference(NewReference {
        address: receipt.merchant_address.clone(),
        phone: receipt.merchant_phone.clone(),
        ..NewReference::new(ReferenceKind::Merchant, receipt.merchant.clone())
      })
      .await?;

    let mut products: HashMap<String, ReferenceId> = HashMap::new();
    let mut items = Vec::with_capacity(receipt.lines.len());
    for line in &receipt.lines {
      let product_id = match products.get(&line.product.key) {
        Some(id) => *id,
        None => {
          let id = resolver.resolve(ReferenceKind::Product, &line.product).await?;
          products.insert(line.product.key.clone(), id);
          id
        }
      };
      items.push(NewReceiptItem {
        line_no: line.line_no,
        product_id,
        quantity: line.quantity,
        unit_price: line.unit_price,
        total_price: line.total_price,
        needs_review: line.needs_review,
      });
    }

    let item_count = items.len();
    let receipt_id = self
      .store
      .insert_receipt(NewReceipt {
        merchant_id,
        transaction_date: receipt.transaction_date,
        subtotal: receipt.subtotal,
        tax: receipt.tax,
        total: receipt.total,
        needs_review: receipt.needs_review,
        source,
        items,
      })
      .await
      .map_err(Error::from_store)?;

    info!(
      receipt_id,
      merchant = %receipt.merchant.display,
      date = %receipt.transaction_date,
      total = %receipt.total,
      items = item_count,
      warnings = normalized.warnings.len(),
      "ingested receipt"
    );

    Ok(Ingested {
      receipt_id,
      merchant_id,
      items: item_count,
      needs_review: receipt.needs_review,
      warnings: normalized.warnings,
    })
  }
}
