//! The store traits consumed by the resolver and the ingestor.
//!
//! Implemented by storage backends (e.g. `tally-store-sqlite`). The pipeline
//! depends on these abstractions, never on a concrete backend.

use std::future::Future;

use crate::{
  receipt::{
    NewReceipt, NewReference, Receipt, ReceiptId, ReceiptItem, ReferenceId, ReferenceKind,
  },
  report::{DailySpending, MerchantSummary, MonthlySpending, ProductFrequency},
};

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Coarse classification of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
  /// A uniqueness, foreign-key or check constraint rejected a write.
  IntegrityViolation,
  Other,
}

pub trait StoreError: std::error::Error + Send + Sync + 'static {
  fn kind(&self) -> StoreErrorKind;
}

// ─── Reference data ──────────────────────────────────────────────────────────

/// Lookup and creation of merchants and products by natural key.
///
/// The store's uniqueness constraint on the natural key is the only arbiter
/// between concurrent writers; see [`crate::resolve`].
pub trait ReferenceStore: Send + Sync {
  type Error: StoreError;

  /// Point lookup by normalized natural key.
  fn lookup_reference(
    &self,
    kind: ReferenceKind,
    key: String,
  ) -> impl Future<Output = Result<Option<ReferenceId>, Self::Error>> + Send + '_;

  /// Insert the row unless its natural key already exists. Returns `true` if
  /// this call created the row. Never fails because of a duplicate key.
  fn insert_reference_if_absent(
    &self,
    reference: NewReference,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn count_references(
    &self,
    kind: ReferenceKind,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;
}

// ─── Receipts ────────────────────────────────────────────────────────────────

pub trait ReceiptStore: ReferenceStore {
  /// Write the header and every item in a single transaction. On any failure
  /// nothing of the receipt remains visible.
  fn insert_receipt(
    &self,
    receipt: NewReceipt,
  ) -> impl Future<Output = Result<ReceiptId, Self::Error>> + Send + '_;

  fn get_receipt(
    &self,
    id: ReceiptId,
  ) -> impl Future<Output = Result<Option<Receipt>, Self::Error>> + Send + '_;

  /// Items of a receipt ordered by line number.
  fn receipt_items(
    &self,
    id: ReceiptId,
  ) -> impl Future<Output = Result<Vec<ReceiptItem>, Self::Error>> + Send + '_;

  /// The receipt previously ingested from an image with this digest, if any.
  fn find_receipt_by_digest(
    &self,
    digest: String,
  ) -> impl Future<Output = Result<Option<ReceiptId>, Self::Error>> + Send + '_;

  fn count_receipts(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  // ── Reporting views ───────────────────────────────────────────────────

  fn merchant_summary(
    &self,
  ) -> impl Future<Output = Result<Vec<MerchantSummary>, Self::Error>> + Send + '_;

  fn product_frequency(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<ProductFrequency>, Self::Error>> + Send + '_;

  fn monthly_spending(
    &self,
  ) -> impl Future<Output = Result<Vec<MonthlySpending>, Self::Error>> + Send + '_;

  fn daily_spending(
    &self,
  ) -> impl Future<Output = Result<Vec<DailySpending>, Self::Error>> + Send + '_;
}
