//! [`SqliteStore`] — the SQLite implementation of [`ReceiptStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use tally_core::{
  receipt::{
    NewReceipt, NewReference, Receipt, ReceiptId, ReceiptItem, ReferenceId, ReferenceKind,
  },
  report::{DailySpending, MerchantSummary, MonthlySpending, ProductFrequency},
  store::{ReceiptStore, ReferenceStore},
};
use tracing::debug;

use crate::{
  Result,
  encode::{
    ReceiptItemRow, ReceiptRow, decode_cents, decode_date, encode_cents, encode_date, encode_dt,
    encode_quantity,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A receipt ledger backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// A receipt item with every column already encoded.
struct ItemColumns {
  line_no:          u32,
  product_id:       i64,
  quantity:         String,
  unit_price_cents: i64,
  total_cents:      i64,
  needs_review:     bool,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Close the underlying connection, flushing the WAL.
  pub async fn close(self) -> Result<()> {
    self.conn.close().await?;
    Ok(())
  }

  async fn count(&self, sql: &'static str) -> Result<u64> {
    let n: i64 = self
      .conn
      .call(move |conn| Ok(conn.query_row(sql, [], |r| r.get(0))?))
      .await?;
    Ok(n as u64)
  }
}

// ─── ReferenceStore impl ─────────────────────────────────────────────────────

impl ReferenceStore for SqliteStore {
  type Error = crate::Error;

  async fn lookup_reference(&self, kind: ReferenceKind, key: String) -> Result<Option<ReferenceId>> {
    let sql = match kind {
      ReferenceKind::Merchant => "SELECT merchant_id FROM merchant WHERE name = ?1",
      ReferenceKind::Product => "SELECT product_id FROM product WHERE description = ?1",
    };

    let id = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(sql, rusqlite::params![key], |r| r.get(0))
            .optional()?,
        )
      })
      .await?;
    Ok(id)
  }

  async fn insert_reference_if_absent(&self, reference: NewReference) -> Result<bool> {
    let NewReference { kind, key, address, phone, category } = reference;
    let now = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        let n = match kind {
          ReferenceKind::Merchant => conn.execute(
            "INSERT INTO merchant (name, display_name, address, phone)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (name) DO NOTHING",
            rusqlite::params![key.key, key.display, address, phone],
          )?,
          ReferenceKind::Product => conn.execute(
            "INSERT INTO product (description, display_description, category, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (description) DO NOTHING",
            rusqlite::params![key.key, key.display, category, now],
          )?,
        };
        Ok(n)
      })
      .await?;

    Ok(changed == 1)
  }

  async fn count_references(&self, kind: ReferenceKind) -> Result<u64> {
    match kind {
      ReferenceKind::Merchant => self.count("SELECT COUNT(*) FROM merchant").await,
      ReferenceKind::Product => self.count("SELECT COUNT(*) FROM product").await,
    }
  }
}

// ─── ReceiptStore impl ───────────────────────────────────────────────────────

impl ReceiptStore for SqliteStore {
  async fn insert_receipt(&self, receipt: NewReceipt) -> Result<ReceiptId> {
    let date_str       = encode_date(receipt.transaction_date);
    let subtotal_cents = receipt.subtotal.map(encode_cents).transpose()?;
    let tax_cents      = receipt.tax.map(encode_cents).transpose()?;
    let total_cents    = encode_cents(receipt.total)?;
    let needs_review   = receipt.needs_review;
    let source_path    = receipt.source.as_ref().map(|s| s.path.clone());
    let source_digest  = receipt.source.as_ref().map(|s| s.digest.clone());
    let created_at     = encode_dt(Utc::now());
    let merchant_id    = receipt.merchant_id;

    let items = receipt
      .items
      .iter()
      .map(|item| -> Result<ItemColumns> {
        Ok(ItemColumns {
          line_no:          item.line_no,
          product_id:       item.product_id,
          quantity:         encode_quantity(item.quantity),
          unit_price_cents: encode_cents(item.unit_price)?,
          total_cents:      encode_cents(item.total_price)?,
          needs_review:     item.needs_review,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    let receipt_id = self
      .conn
      .call(move |conn| {
        // Dropping `tx` without commit rolls back the header and any items.
        let tx = conn.transaction()?;

        tx.execute(
          "INSERT INTO receipt (
             merchant_id, transaction_date, subtotal_cents, tax_cents, total_cents,
             needs_review, source_path, source_digest, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            merchant_id,
            date_str,
            subtotal_cents,
            tax_cents,
            total_cents,
            needs_review,
            source_path,
            source_digest,
            created_at,
          ],
        )?;
        let receipt_id = tx.last_insert_rowid();

        {
          let mut stmt = tx.prepare(
            "INSERT INTO receipt_item (
               receipt_id, product_id, line_no, quantity,
               unit_price_cents, total_cents, needs_review
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          )?;
          for item in &items {
            stmt.execute(rusqlite::params![
              receipt_id,
              item.product_id,
              item.line_no,
              item.quantity,
              item.unit_price_cents,
              item.total_cents,
              item.needs_review,
            ])?;
          }
        }

        tx.commit()?;
        Ok(receipt_id)
      })
      .await?;

    debug!(receipt_id, "receipt committed");
    Ok(receipt_id)
  }

  async fn get_receipt(&self, id: ReceiptId) -> Result<Option<Receipt>> {
    let row: Option<ReceiptRow> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT receipt_id, merchant_id, transaction_date, subtotal_cents, tax_cents,
                      total_cents, needs_review, source_path, source_digest, created_at
               FROM receipt WHERE receipt_id = ?1",
              rusqlite::params![id],
              |row| {
                Ok(ReceiptRow {
                  receipt_id:       row.get(0)?,
                  merchant_id:      row.get(1)?,
                  transaction_date: row.get(2)?,
                  subtotal_cents:   row.get(3)?,
                  tax_cents:        row.get(4)?,
                  total_cents:      row.get(5)?,
                  needs_review:     row.get(6)?,
                  source_path:      row.get(7)?,
                  source_digest:    row.get(8)?,
                  created_at:       row.get(9)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    row.map(ReceiptRow::into_receipt).transpose()
  }

  async fn receipt_items(&self, id: ReceiptId) -> Result<Vec<ReceiptItem>> {
    let rows: Vec<ReceiptItemRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT receipt_item_id, receipt_id, product_id, line_no, quantity,
                  unit_price_cents, total_cents, needs_review
           FROM receipt_item WHERE receipt_id = ?1
           ORDER BY line_no",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id], |row| {
            Ok(ReceiptItemRow {
              receipt_item_id:  row.get(0)?,
              receipt_id:       row.get(1)?,
              product_id:       row.get(2)?,
              line_no:          row.get(3)?,
              quantity:         row.get(4)?,
              unit_price_cents: row.get(5)?,
              total_cents:      row.get(6)?,
              needs_review:     row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows.into_iter().map(ReceiptItemRow::into_item).collect()
  }

  async fn find_receipt_by_digest(&self, digest: String) -> Result<Option<ReceiptId>> {
    let id = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT receipt_id FROM receipt WHERE source_digest = ?1",
              rusqlite::params![digest],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(id)
  }

  async fn count_receipts(&self) -> Result<u64> { self.count("SELECT COUNT(*) FROM receipt").await }

  // ── Reporting views ───────────────────────────────────────────────────────

  async fn merchant_summary(&self) -> Result<Vec<MerchantSummary>> {
    let rows: Vec<(String, i64, i64)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT merchant, receipts, total_cents FROM v_merchant_summary
           ORDER BY total_cents DESC, merchant",
        )?;
        let rows = stmt
          .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(
      rows
        .into_iter()
        .map(|(merchant, receipts, cents)| MerchantSummary {
          merchant,
          receipts: receipts as u64,
          total_spent: decode_cents(cents),
        })
        .collect(),
    )
  }

  async fn product_frequency(&self, limit: usize) -> Result<Vec<ProductFrequency>> {
    let limit = limit as i64;
    let rows: Vec<(String, i64, i64)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT description, purchases, total_cents FROM v_product_frequency
           ORDER BY purchases DESC, description
           LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![limit], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(
      rows
        .into_iter()
        .map(|(description, purchases, cents)| ProductFrequency {
          description,
          purchases: purchases as u64,
          total_spent: decode_cents(cents),
        })
        .collect(),
    )
  }

  async fn monthly_spending(&self) -> Result<Vec<MonthlySpending>> {
    let rows: Vec<(String, String, i64, i64)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT month, merchant, receipts, total_cents FROM v_monthly_merchant_spending
           ORDER BY month, merchant",
        )?;
        let rows = stmt
          .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(
      rows
        .into_iter()
        .map(|(month, merchant, receipts, cents)| MonthlySpending {
          month,
          merchant,
          receipts: receipts as u64,
          total_spent: decode_cents(cents),
        })
        .collect(),
    )
  }

  async fn daily_spending(&self) -> Result<Vec<DailySpending>> {
    let rows: Vec<(String, i64, i64)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT day, receipts, total_cents FROM v_daily_spending ORDER BY day",
        )?;
        let rows = stmt
          .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(day, receipts, cents)| -> Result<DailySpending> {
        Ok(DailySpending {
          date:        decode_date(&day)?,
          receipts:    receipts as u64,
          total_spent: decode_cents(cents),
        })
      })
      .collect()
  }
}
