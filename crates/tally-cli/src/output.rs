//! Plain-text tables for the terminal.

use tally_core::{
  batch::{BatchSummary, SkipReason},
  report::{DailySpending, MerchantSummary, MonthlySpending, ProductFrequency},
};

pub fn print_batch(summary: &BatchSummary) {
  println!("\n=== PROCESSED RECEIPTS ===\n");
  for file in &summary.ingested {
    let flag = if file.outcome.needs_review { "  [needs review]" } else { "" };
    println!(
      "✓ {} → receipt #{} ({} items){flag}",
      file.path.display(),
      file.outcome.receipt_id,
      file.outcome.items,
    );
    for warning in &file.outcome.warnings {
      println!("    ⚠ {warning}");
    }
  }
  for file in &summary.skipped {
    match &file.reason {
      SkipReason::AlreadyIngested { receipt_id } => {
        println!("- {} already ingested as receipt #{receipt_id}", file.path.display())
      }
      SkipReason::Failed { error } => println!("✗ {}: {error}", file.path.display()),
    }
  }
  println!(
    "\n{} ingested, {} skipped, {} warnings",
    summary.ingested.len(),
    summary.skipped.len(),
    summary.warning_count(),
  );
  if summary.lost > 0 {
    println!("{} workers terminated without reporting their image", summary.lost);
  }
}

pub fn print_merchants(rows: &[MerchantSummary]) {
  println!("\n=== MERCHANT SUMMARY ===\n");
  for row in rows {
    println!("{:20} | {:3} receipts | ${:>8}", truncate(&row.merchant, 20), row.receipts, row.total_spent);
  }
}

pub fn print_products(rows: &[ProductFrequency]) {
  println!("\n=== TOP PRODUCTS ===\n");
  for row in rows {
    println!(
      "{:40} | {:2} purchases | ${:>7}",
      truncate(&row.description, 40),
      row.purchases,
      row.total_spent
    );
  }
}

pub fn print_monthly(rows: &[MonthlySpending]) {
  println!("\n=== MONTHLY SPENDING ===\n");
  for row in rows {
    println!(
      "{} | {:20} | {:3} receipts | ${:>8}",
      row.month,
      truncate(&row.merchant, 20),
      row.receipts,
      row.total_spent
    );
  }
}

pub fn print_daily(rows: &[DailySpending]) {
  println!("\n=== DAILY SPENDING ===\n");
  for row in rows {
    println!("{} | {:3} receipts | ${:>8}", row.date, row.receipts, row.total_spent);
  }
}

fn truncate(s: &str, width: usize) -> String { s.chars().take(width).collect() }
