//! Integration tests for `SqliteStore` and the ingestion pipeline against an
//! in-memory database.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
  },
};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tally_core::{
  Error as CoreError,
  batch::{BatchOptions, BatchRunner, SkipReason},
  extract::{Extractor, RetryPolicy},
  ingest::Ingestor,
  normalize::{Normalizer, normalize_name},
  raw::{RawLineItem, RawReceipt},
  receipt::{NewReceipt, NewReceiptItem, ReceiptSource, ReferenceKind},
  resolve::Resolver,
  store::{ReceiptStore, ReferenceStore, StoreError, StoreErrorKind},
};

use crate::SqliteStore;

async fn store() -> Arc<SqliteStore> {
  Arc::new(
    SqliteStore::open_in_memory()
      .await
      .expect("in-memory store"),
  )
}

fn ingestor(store: &Arc<SqliteStore>) -> Ingestor<SqliteStore> {
  Ingestor::new(Arc::clone(store), Normalizer::default())
}

fn dec(s: &str) -> Decimal { s.parse().unwrap() }

fn groceries() -> RawReceipt {
  RawReceipt {
    merchant_name: Some("TRADER JOE'S".into()),
    merchant_address: Some("401 Bay St\nSan Francisco, CA".into()),
    transaction_date: Some("06/28/2014".into()),
    subtotal: Some("4.48".into()),
    tax: Some("0.35".into()),
    total: Some("4.83".into()),
    items: vec![
      RawLineItem::new("BANANAS", "1", "0.99", "0.99"),
      RawLineItem::new("MILK", "1", "3.49", "3.49"),
    ],
    ..Default::default()
  }
}

fn coffee(date: &str, total: &str) -> RawReceipt {
  RawReceipt {
    merchant_name: Some("Blue Bottle".into()),
    transaction_date: Some(date.into()),
    subtotal: Some(total.into()),
    total: Some(total.into()),
    items: vec![RawLineItem {
      description: Some("Latte".into()),
      quantity:    None,
      unit_price:  None,
      total_price: Some(total.into()),
    }],
    ..Default::default()
  }
}

// ─── Entity resolution ───────────────────────────────────────────────────────

#[tokio::test]
async fn resolve_folds_case_and_whitespace() {
  let s = store().await;
  let resolver = Resolver::new(s.as_ref());

  let a = resolver
    .resolve(ReferenceKind::Merchant, &normalize_name("Trader Joe's").unwrap())
    .await
    .unwrap();
  let b = resolver
    .resolve(ReferenceKind::Merchant, &normalize_name("  TRADER   JOE'S ").unwrap())
    .await
    .unwrap();

  assert_eq!(a, b);
  assert_eq!(s.count_references(ReferenceKind::Merchant).await.unwrap(), 1);
}

#[tokio::test]
async fn resolve_twice_creates_one_row() {
  let s = store().await;
  let resolver = Resolver::new(s.as_ref());
  let key = normalize_name("Bananas").unwrap();

  let first = resolver.resolve(ReferenceKind::Product, &key).await.unwrap();
  let second = resolver.resolve(ReferenceKind::Product, &key).await.unwrap();

  assert_eq!(first, second);
  assert_eq!(s.count_references(ReferenceKind::Product).await.unwrap(), 1);
  assert_eq!(s.count_references(ReferenceKind::Merchant).await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_resolution_creates_one_row() {
  let s = store().await;
  let key = normalize_name("milk").unwrap();
  let r1 = Resolver::new(s.as_ref());
  let r2 = Resolver::new(s.as_ref());

  let (a, b) = tokio::join!(
    r1.resolve(ReferenceKind::Product, &key),
    r2.resolve(ReferenceKind::Product, &key),
  );

  assert_eq!(a.unwrap(), b.unwrap());
  assert_eq!(s.count_references(ReferenceKind::Product).await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_insert_reports_not_created() {
  let s = store().await;
  let reference = tally_core::receipt::NewReference::new(
    ReferenceKind::Merchant,
    normalize_name("Safeway").unwrap(),
  );

  assert!(s.insert_reference_if_absent(reference.clone()).await.unwrap());
  assert!(!s.insert_reference_if_absent(reference).await.unwrap());
}

// ─── Ingestion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn ingest_round_trip() {
  let s = store().await;
  let outcome = ingestor(&s).ingest(&groceries()).await.unwrap();

  assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
  assert_eq!(outcome.items, 2);

  let receipt = s.get_receipt(outcome.receipt_id).await.unwrap().unwrap();
  assert_eq!(receipt.merchant_id, outcome.merchant_id);
  assert_eq!(receipt.transaction_date, NaiveDate::from_ymd_opt(2014, 6, 28).unwrap());
  assert_eq!(receipt.subtotal, Some(dec("4.48")));
  assert_eq!(receipt.tax, Some(dec("0.35")));
  assert_eq!(receipt.total, dec("4.83"));
  assert!(!receipt.needs_review);
  assert!(receipt.source.is_none());

  let items = s.receipt_items(outcome.receipt_id).await.unwrap();
  assert_eq!(items.len(), 2);
  assert_eq!(items[0].line_no, 1);
  assert_eq!(items[0].quantity, Decimal::ONE);
  assert_eq!(items[0].unit_price, dec("0.99"));
  assert_eq!(items[1].total_price, dec("3.49"));
  let sum: Decimal = items.iter().map(|i| i.total_price).sum();
  assert_eq!(sum, dec("4.48"));
}

#[tokio::test]
async fn same_receipt_twice_shares_reference_rows() {
  let s = store().await;
  let ing = ingestor(&s);

  let first = ing.ingest(&groceries()).await.unwrap();
  let second = ing.ingest(&groceries()).await.unwrap();

  assert_ne!(first.receipt_id, second.receipt_id);
  assert_eq!(first.merchant_id, second.merchant_id);
  assert_eq!(s.count_references(ReferenceKind::Merchant).await.unwrap(), 1);
  assert_eq!(s.count_references(ReferenceKind::Product).await.unwrap(), 2);
  assert_eq!(s.count_receipts().await.unwrap(), 2);
}

#[tokio::test]
async fn repeated_product_on_one_receipt_resolves_once() {
  let s = store().await;
  let mut raw = groceries();
  raw.items.push(RawLineItem::new("bananas ", "1", "0.99", "0.99"));
  raw.subtotal = Some("5.47".into());
  raw.total = Some("5.82".into());

  let outcome = ingestor(&s).ingest(&raw).await.unwrap();
  let items = s.receipt_items(outcome.receipt_id).await.unwrap();

  assert_eq!(items.len(), 3);
  assert_eq!(items[0].product_id, items[2].product_id);
  assert_eq!(s.count_references(ReferenceKind::Product).await.unwrap(), 2);
}

#[tokio::test]
async fn flagged_lines_are_persisted_for_review() {
  let s = store().await;
  let mut raw = groceries();
  raw.items[0] = RawLineItem::new("BANANAS", "-1", "0.99", "0.99");

  let outcome = ingestor(&s).ingest(&raw).await.unwrap();
  assert!(outcome.needs_review);
  assert!(!outcome.warnings.is_empty());

  let receipt = s.get_receipt(outcome.receipt_id).await.unwrap().unwrap();
  assert!(receipt.needs_review);
  let items = s.receipt_items(outcome.receipt_id).await.unwrap();
  assert!(items[0].needs_review);
  assert_eq!(items[0].quantity, Decimal::ZERO);
  assert!(!items[1].needs_review);
}

#[tokio::test]
async fn weighed_quantity_round_trips() {
  let s = store().await;
  let mut raw = groceries();
  raw.items = vec![RawLineItem::new("Apples", "0.41 lb", "2.99/lb", "1.23")];
  raw.subtotal = Some("1.23".into());
  raw.tax = None;
  raw.total = Some("1.23".into());

  let outcome = ingestor(&s).ingest(&raw).await.unwrap();
  assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);

  let items = s.receipt_items(outcome.receipt_id).await.unwrap();
  assert_eq!(items[0].quantity, dec("0.41"));
  assert_eq!(items[0].unit_price, dec("2.99"));
}

#[tokio::test]
async fn malformed_total_writes_nothing() {
  let s = store().await;
  let mut raw = groceries();
  raw.total = Some("N/A".into());

  let err = ingestor(&s).ingest(&raw).await.unwrap_err();
  assert!(matches!(err, CoreError::MalformedAmount { field: "total", .. }));
  assert_eq!(s.count_receipts().await.unwrap(), 0);
  assert_eq!(s.count_references(ReferenceKind::Merchant).await.unwrap(), 0);
}

// ─── Atomicity ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_item_insert_rolls_back_header() {
  let s = store().await;
  let merchant_id = Resolver::new(s.as_ref())
    .resolve(ReferenceKind::Merchant, &normalize_name("Safeway").unwrap())
    .await
    .unwrap();
  let product_id = Resolver::new(s.as_ref())
    .resolve(ReferenceKind::Product, &normalize_name("Eggs").unwrap())
    .await
    .unwrap();

  let item = |line_no, product_id| NewReceiptItem {
    line_no,
    product_id,
    quantity: Decimal::ONE,
    unit_price: dec("2.00"),
    total_price: dec("2.00"),
    needs_review: false,
  };

  let err = s
    .insert_receipt(NewReceipt {
      merchant_id,
      transaction_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
      subtotal: Some(dec("4.00")),
      tax: None,
      total: dec("4.00"),
      needs_review: false,
      source: None,
      // The second line points at a product that does not exist.
      items: vec![item(1, product_id), item(2, product_id + 1000)],
    })
    .await
    .unwrap_err();

  assert_eq!(err.kind(), StoreErrorKind::IntegrityViolation);
  assert!(matches!(CoreError::from_store(err), CoreError::IntegrityViolation(_)));
  assert_eq!(s.count_receipts().await.unwrap(), 0);
  assert!(s.get_receipt(1).await.unwrap().is_none());
  assert!(s.receipt_items(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_merchant_is_rejected() {
  let s = store().await;
  let err = s
    .insert_receipt(NewReceipt {
      merchant_id:      42,
      transaction_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
      subtotal:         None,
      tax:              None,
      total:            dec("1.00"),
      needs_review:     false,
      source:           None,
      items:            vec![],
    })
    .await
    .unwrap_err();

  assert_eq!(err.kind(), StoreErrorKind::IntegrityViolation);
  assert_eq!(s.count_receipts().await.unwrap(), 0);
}

// ─── Source digests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn digest_lookup_and_uniqueness() {
  let s = store().await;
  let ing = ingestor(&s);
  let source = ReceiptSource { path: "data/receipts/0.jpg".into(), digest: "abc123".into() };

  let outcome = ing.ingest_from(&groceries(), Some(source.clone())).await.unwrap();
  assert_eq!(
    s.find_receipt_by_digest("abc123".into()).await.unwrap(),
    Some(outcome.receipt_id)
  );
  assert_eq!(s.find_receipt_by_digest("other".into()).await.unwrap(), None);

  let stored = s.get_receipt(outcome.receipt_id).await.unwrap().unwrap();
  assert_eq!(stored.source, Some(source.clone()));

  let err = ing.ingest_from(&groceries(), Some(source)).await.unwrap_err();
  assert!(matches!(err, CoreError::IntegrityViolation(_)));
  assert_eq!(s.count_receipts().await.unwrap(), 1);
}

// ─── Reporting views ─────────────────────────────────────────────────────────

#[tokio::test]
async fn reporting_views() {
  let s = store().await;
  let ing = ingestor(&s);
  ing.ingest(&groceries()).await.unwrap();
  ing.ingest(&groceries()).await.unwrap();
  ing.ingest(&coffee("2014-07-02", "5.00")).await.unwrap();
  ing.ingest(&coffee("2014-07-02", "5.50")).await.unwrap();

  let merchants = s.merchant_summary().await.unwrap();
  assert_eq!(merchants.len(), 2);
  assert_eq!(merchants[0].merchant, "Blue Bottle");
  assert_eq!(merchants[0].receipts, 2);
  assert_eq!(merchants[0].total_spent, dec("10.50"));
  assert_eq!(merchants[1].merchant, "TRADER JOE'S");
  assert_eq!(merchants[1].total_spent, dec("9.66"));

  let products = s.product_frequency(2).await.unwrap();
  assert_eq!(products.len(), 2);
  assert_eq!(products[0].description, "BANANAS");
  assert_eq!(products[0].purchases, 2);
  assert_eq!(products[0].total_spent, dec("1.98"));

  let monthly = s.monthly_spending().await.unwrap();
  assert_eq!(monthly.len(), 2);
  assert_eq!(monthly[0].month, "2014-06");
  assert_eq!(monthly[0].merchant, "TRADER JOE'S");
  assert_eq!(monthly[1].month, "2014-07");
  assert_eq!(monthly[1].total_spent, dec("10.50"));

  let daily = s.daily_spending().await.unwrap();
  assert_eq!(daily.len(), 2);
  assert_eq!(daily[1].date, NaiveDate::from_ymd_opt(2014, 7, 2).unwrap());
  assert_eq!(daily[1].receipts, 2);
}

// ─── Batch runs ──────────────────────────────────────────────────────────────

/// Serves field bags by file name, failing transiently a scripted number of
/// times first. Unknown files yield `ExtractionMalformed`.
#[derive(Default)]
struct ScriptedExtractor {
  receipts:  HashMap<String, RawReceipt>,
  transient: Mutex<HashMap<String, u32>>,
  calls:     AtomicU32,
  /// The worker handling this file panics.
  crash_on:  Option<String>,
  /// Every extraction waits here, so all workers pass the digest check before
  /// any of them stores.
  gate:      Option<tokio::sync::Barrier>,
}

impl Extractor for ScriptedExtractor {
  async fn extract<'a>(&'a self, image: &'a Path) -> tally_core::Result<RawReceipt> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let name = image
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();

    if let Some(gate) = &self.gate {
      gate.wait().await;
    }
    if self.crash_on.as_deref() == Some(name.as_str()) {
      panic!("decoder crashed on {name}");
    }

    {
      let mut transient = self.transient.lock().unwrap();
      if let Some(left) = transient.get_mut(&name)
        && *left > 0
      {
        *left -= 1;
        return Err(CoreError::ExtractionUnavailable("503 Service Unavailable".into()));
      }
    }

    self
      .receipts
      .get(&name)
      .cloned()
      .ok_or_else(|| CoreError::ExtractionMalformed(format!("no documents in {name}")))
  }
}

fn scratch_dir(name: &str) -> PathBuf {
  let dir = std::env::temp_dir().join(format!("tally-{name}-{}", std::process::id()));
  let _ = std::fs::remove_dir_all(&dir);
  std::fs::create_dir_all(&dir).unwrap();
  dir
}

fn write_images(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
  names
    .iter()
    .map(|name| {
      let path = dir.join(name);
      std::fs::write(&path, format!("image bytes of {name}")).unwrap();
      path
    })
    .collect()
}

fn quick_options(workers: usize) -> BatchOptions {
  BatchOptions {
    workers,
    retry: RetryPolicy { max_attempts: 3, base_delay_ms: 0, max_delay_ms: 0 },
    write_sidecars: false,
  }
}

#[tokio::test]
async fn transient_extraction_failure_ingests_once() {
  let s = store().await;
  let dir = scratch_dir("transient");
  let images = write_images(&dir, &["0.jpg"]);

  let extractor = ScriptedExtractor {
    receipts: HashMap::from([("0.jpg".to_owned(), groceries())]),
    transient: Mutex::new(HashMap::from([("0.jpg".to_owned(), 1)])),
    ..Default::default()
  };
  let extractor = Arc::new(extractor);
  let runner = BatchRunner::new(Arc::clone(&extractor), ingestor(&s), quick_options(1));

  let summary = runner.run(images).await;

  assert_eq!(summary.ingested.len(), 1);
  assert!(summary.skipped.is_empty());
  assert_eq!(summary.ingested[0].attempts, 2);
  assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
  assert_eq!(s.count_receipts().await.unwrap(), 1);
}

#[tokio::test]
async fn one_bad_receipt_does_not_stop_the_batch() {
  let s = store().await;
  let dir = scratch_dir("mixed");
  let images = write_images(&dir, &["a.jpg", "blurry.jpg", "c.jpg", "no-total.jpg"]);

  let mut no_total = groceries();
  no_total.total = None;
  let extractor = ScriptedExtractor {
    receipts: HashMap::from([
      ("a.jpg".to_owned(), groceries()),
      ("c.jpg".to_owned(), coffee("07/02/2014", "4.50")),
      ("no-total.jpg".to_owned(), no_total),
    ]),
    ..Default::default()
  };
  let runner = BatchRunner::new(Arc::new(extractor), ingestor(&s), quick_options(2));

  let summary = runner.run(images).await;

  assert_eq!(summary.ingested.len(), 2);
  assert_eq!(summary.skipped.len(), 2);
  assert_eq!(summary.lost, 0);
  assert!(summary.ingested[0].path.ends_with("a.jpg"));
  assert!(summary.ingested[1].path.ends_with("c.jpg"));
  assert!(summary.skipped[0].path.ends_with("blurry.jpg"));
  assert!(matches!(&summary.skipped[0].reason, SkipReason::Failed { error } if error.contains("no usable structure")));
  assert!(matches!(&summary.skipped[1].reason, SkipReason::Failed { error } if error.contains("total")));
  assert_eq!(s.count_receipts().await.unwrap(), 2);
}

#[tokio::test]
async fn rerun_skips_already_ingested_images() {
  let s = store().await;
  let dir = scratch_dir("rerun");
  let images = write_images(&dir, &["0.jpg", "1.jpg"]);

  let extractor = ScriptedExtractor {
    receipts: HashMap::from([
      ("0.jpg".to_owned(), groceries()),
      ("1.jpg".to_owned(), groceries()),
    ]),
    ..Default::default()
  };
  let extractor = Arc::new(extractor);
  let runner = BatchRunner::new(Arc::clone(&extractor), ingestor(&s), quick_options(2));

  let first = runner.run(images.clone()).await;
  assert_eq!(first.ingested.len(), 2);
  assert_eq!(s.count_references(ReferenceKind::Merchant).await.unwrap(), 1);

  let second = runner.run(images).await;
  assert!(second.ingested.is_empty());
  assert_eq!(second.skipped.len(), 2);
  assert!(second
    .skipped
    .iter()
    .all(|f| matches!(f.reason, SkipReason::AlreadyIngested { .. })));
  assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
  assert_eq!(s.count_receipts().await.unwrap(), 2);
}

#[tokio::test]
async fn sidecars_are_written_when_enabled() {
  let s = store().await;
  let dir = scratch_dir("sidecar");
  let images = write_images(&dir, &["0.jpg"]);

  let extractor = ScriptedExtractor {
    receipts: HashMap::from([("0.jpg".to_owned(), groceries())]),
    ..Default::default()
  };
  let options = BatchOptions { write_sidecars: true, ..quick_options(1) };
  let runner = BatchRunner::new(Arc::new(extractor), ingestor(&s), options);

  let summary = runner.run(images).await;
  assert_eq!(summary.ingested.len(), 1);

  let json = std::fs::read_to_string(dir.join("0_output.json")).unwrap();
  let raw: RawReceipt = serde_json::from_str(&json).unwrap();
  assert_eq!(raw, groceries());
}

#[tokio::test]
async fn crashed_worker_is_reported_against_its_image() {
  let s = store().await;
  let dir = scratch_dir("crash");
  let images = write_images(&dir, &["a.jpg", "boom.jpg"]);

  let extractor = ScriptedExtractor {
    receipts: HashMap::from([
      ("a.jpg".to_owned(), groceries()),
      ("boom.jpg".to_owned(), groceries()),
    ]),
    crash_on: Some("boom.jpg".into()),
    ..Default::default()
  };
  let runner = BatchRunner::new(Arc::new(extractor), ingestor(&s), quick_options(2));

  let summary = runner.run(images).await;

  assert_eq!(summary.ingested.len(), 1);
  assert!(summary.ingested[0].path.ends_with("a.jpg"));
  assert_eq!(summary.skipped.len(), 1);
  assert!(summary.skipped[0].path.ends_with("boom.jpg"));
  assert!(matches!(
    &summary.skipped[0].reason,
    SkipReason::Failed { error } if error.contains("terminated abnormally")
  ));
  assert_eq!(summary.lost, 0);
  assert_eq!(s.count_receipts().await.unwrap(), 1);
}

#[tokio::test]
async fn identical_images_in_one_batch_ingest_once() {
  let s = store().await;
  let dir = scratch_dir("twins");
  let images: Vec<PathBuf> = ["scan.jpg", "scan-copy.jpg"]
    .iter()
    .map(|name| {
      let path = dir.join(name);
      std::fs::write(&path, b"same photo twice").unwrap();
      path
    })
    .collect();

  let extractor = ScriptedExtractor {
    receipts: HashMap::from([
      ("scan.jpg".to_owned(), groceries()),
      ("scan-copy.jpg".to_owned(), groceries()),
    ]),
    gate: Some(tokio::sync::Barrier::new(2)),
    ..Default::default()
  };
  let runner = BatchRunner::new(Arc::new(extractor), ingestor(&s), quick_options(2));

  let summary = runner.run(images).await;

  assert_eq!(summary.ingested.len(), 1);
  assert_eq!(summary.skipped.len(), 1);
  let receipt_id = summary.ingested[0].outcome.receipt_id;
  assert!(matches!(
    summary.skipped[0].reason,
    SkipReason::AlreadyIngested { receipt_id: id } if id == receipt_id
  ));
  assert_eq!(s.count_receipts().await.unwrap(), 1);
}

#[tokio::test]
async fn out_of_range_line_is_ingested_for_review() {
  let s = store().await;
  let dir = scratch_dir("huge-line");
  let images = write_images(&dir, &["0.jpg"]);

  let mut raw = groceries();
  raw.items.push(RawLineItem::new("A", "99999999999999999999", "99999999999", "1.00"));
  let extractor = ScriptedExtractor {
    receipts: HashMap::from([("0.jpg".to_owned(), raw)]),
    ..Default::default()
  };
  let runner = BatchRunner::new(Arc::new(extractor), ingestor(&s), quick_options(1));

  let summary = runner.run(images).await;

  assert!(summary.skipped.is_empty());
  assert_eq!(summary.ingested.len(), 1);
  assert!(summary.ingested[0].outcome.needs_review);
  assert_eq!(s.count_receipts().await.unwrap(), 1);
}
