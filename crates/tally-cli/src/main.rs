//! `tally` — turn photographed receipts into a queryable spending ledger.
//!
//! # Usage
//!
//! ```
//! tally run --input-dir data/receipts
//! tally extract data/receipts/0.jpg
//! tally report merchants
//! ```

mod extractor;
mod output;
mod settings;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use extractor::AnyExtractor;
use settings::AppConfig;
use tally_core::{
  batch::{BatchOptions, BatchRunner},
  extract::extract_with_retry,
  ingest::Ingestor,
  normalize::Normalizer,
  store::ReceiptStore,
};
use tally_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "bmp", "pdf"];

#[derive(Parser)]
#[command(author, version, about = "Receipt ingestion and spending reports")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "tally.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Extract and ingest every receipt image in a directory.
  Run {
    /// Overrides `input_dir` from the configuration.
    #[arg(long, value_name = "DIR")]
    input_dir: Option<PathBuf>,
  },
  /// Print the raw field bag extracted from one image as JSON.
  Extract { image: PathBuf },
  /// Print a spending report.
  Report {
    #[arg(value_enum)]
    view: ReportView,

    /// Rows shown for `products`.
    #[arg(long, default_value_t = 20)]
    limit: usize,
  },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportView {
  Merchants,
  Products,
  Monthly,
  Daily,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = AppConfig::load(&cli.config)?;

  match cli.command {
    Command::Run { input_dir } => {
      let input_dir = input_dir.unwrap_or_else(|| cfg.input_dir.clone());
      run(&cfg, &input_dir).await
    }
    Command::Extract { image } => extract(&cfg, &image).await,
    Command::Report { view, limit } => report(&cfg, view, limit).await,
  }
}

async fn open_store(cfg: &AppConfig) -> anyhow::Result<SqliteStore> {
  if let Some(parent) = cfg.store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))
}

async fn run(cfg: &AppConfig, input_dir: &Path) -> anyhow::Result<()> {
  let extractor = AnyExtractor::from_config(cfg).context("failed to set up extractor")?;
  let store = Arc::new(open_store(cfg).await?);

  let images = scan_images(input_dir)
    .await
    .with_context(|| format!("failed to scan {input_dir:?}"))?;
  tracing::info!(dir = %input_dir.display(), images = images.len(), "starting batch");

  let options = BatchOptions {
    workers:        cfg.workers,
    retry:          cfg.retry.clone(),
    write_sidecars: cfg.write_sidecars && extractor.writes_sidecars(),
  };
  let ingestor = Ingestor::new(Arc::clone(&store), Normalizer::new(cfg.normalize.clone()))
    .with_resolve_attempts(cfg.resolve_attempts);
  let summary = BatchRunner::new(Arc::new(extractor), ingestor, options)
    .run(images)
    .await;

  output::print_batch(&summary);
  output::print_merchants(&store.merchant_summary().await?);

  match Arc::try_unwrap(store) {
    Ok(store) => store.close().await?,
    Err(_) => tracing::warn!("store still shared after batch, leaving it to close on drop"),
  }
  Ok(())
}

async fn extract(cfg: &AppConfig, image: &Path) -> anyhow::Result<()> {
  let extractor = AnyExtractor::from_config(cfg).context("failed to set up extractor")?;
  let (raw, _) = extract_with_retry(&extractor, image, &cfg.retry)
    .await
    .with_context(|| format!("failed to extract {image:?}"))?;
  println!("{}", serde_json::to_string_pretty(&raw)?);
  Ok(())
}

async fn report(cfg: &AppConfig, view: ReportView, limit: usize) -> anyhow::Result<()> {
  let store = open_store(cfg).await?;
  match view {
    ReportView::Merchants => output::print_merchants(&store.merchant_summary().await?),
    ReportView::Products => output::print_products(&store.product_frequency(limit).await?),
    ReportView::Monthly => output::print_monthly(&store.monthly_spending().await?),
    ReportView::Daily => output::print_daily(&store.daily_spending().await?),
  }
  store.close().await?;
  Ok(())
}

/// Receipt images directly under `dir`, sorted by path.
async fn scan_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
  let mut entries = tokio::fs::read_dir(dir).await?;
  let mut images = Vec::new();
  while let Some(entry) = entries.next_entry().await? {
    let path = entry.path();
    if entry.file_type().await?.is_file() && is_image(&path) {
      images.push(path);
    }
  }
  images.sort();
  Ok(images)
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}
