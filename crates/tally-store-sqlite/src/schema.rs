//! SQL schema for the tally SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Natural keys are stored already folded (trimmed, collapsed, uppercased).
CREATE TABLE IF NOT EXISTS merchant (
    merchant_id   INTEGER PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE,
    display_name  TEXT NOT NULL,
    address       TEXT,
    phone         TEXT
);

CREATE TABLE IF NOT EXISTS product (
    product_id          INTEGER PRIMARY KEY,
    description         TEXT NOT NULL UNIQUE,
    display_description TEXT NOT NULL,
    category            TEXT,
    created_at          TEXT NOT NULL,   -- RFC 3339 UTC
    updated_at          TEXT NOT NULL
);

-- Money columns hold integer cents.
CREATE TABLE IF NOT EXISTS receipt (
    receipt_id       INTEGER PRIMARY KEY,
    merchant_id      INTEGER NOT NULL REFERENCES merchant(merchant_id) ON DELETE RESTRICT,
    transaction_date TEXT NOT NULL,      -- YYYY-MM-DD
    subtotal_cents   INTEGER,
    tax_cents        INTEGER,
    total_cents      INTEGER NOT NULL,
    needs_review     INTEGER NOT NULL DEFAULT 0,
    source_path      TEXT,
    source_digest    TEXT,               -- hex SHA-256 of the image
    created_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS receipt_item (
    receipt_item_id  INTEGER PRIMARY KEY,
    receipt_id       INTEGER NOT NULL REFERENCES receipt(receipt_id) ON DELETE CASCADE,
    product_id       INTEGER NOT NULL REFERENCES product(product_id) ON DELETE RESTRICT,
    line_no          INTEGER NOT NULL,
    quantity         TEXT NOT NULL,      -- canonical decimal string
    unit_price_cents INTEGER NOT NULL,
    total_cents      INTEGER NOT NULL,
    needs_review     INTEGER NOT NULL DEFAULT 0,
    UNIQUE (receipt_id, line_no)
);

CREATE INDEX IF NOT EXISTS receipt_merchant_idx      ON receipt(merchant_id);
CREATE INDEX IF NOT EXISTS receipt_date_idx          ON receipt(transaction_date);
CREATE UNIQUE INDEX IF NOT EXISTS receipt_digest_idx ON receipt(source_digest)
    WHERE source_digest IS NOT NULL;
CREATE INDEX IF NOT EXISTS receipt_item_receipt_idx  ON receipt_item(receipt_id);
CREATE INDEX IF NOT EXISTS receipt_item_product_idx  ON receipt_item(product_id);

-- ─── Reporting views ────────────────────────────────────────────────────────

CREATE VIEW IF NOT EXISTS v_product_frequency AS
    SELECT p.display_description   AS description,
           COUNT(ri.receipt_item_id) AS purchases,
           SUM(ri.total_cents)     AS total_cents
    FROM receipt_item ri
    JOIN product p ON p.product_id = ri.product_id
    GROUP BY p.product_id;

CREATE VIEW IF NOT EXISTS v_monthly_merchant_spending AS
    SELECT strftime('%Y-%m', r.transaction_date) AS month,
           m.display_name                        AS merchant,
           COUNT(r.receipt_id)                   AS receipts,
           SUM(r.total_cents)                    AS total_cents
    FROM receipt r
    JOIN merchant m ON m.merchant_id = r.merchant_id
    GROUP BY month, m.merchant_id;

CREATE VIEW IF NOT EXISTS v_daily_spending AS
    SELECT r.transaction_date    AS day,
           COUNT(r.receipt_id)   AS receipts,
           SUM(r.total_cents)    AS total_cents
    FROM receipt r
    GROUP BY r.transaction_date;

CREATE VIEW IF NOT EXISTS v_merchant_summary AS
    SELECT m.display_name        AS merchant,
           COUNT(r.receipt_id)   AS receipts,
           SUM(r.total_cents)    AS total_cents
    FROM receipt r
    JOIN merchant m ON m.merchant_id = r.merchant_id
    GROUP BY m.merchant_id;

PRAGMA user_version = 1;
";
