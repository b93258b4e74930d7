//! Core types and ingestion pipeline for the tally receipt ledger.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! OCR service and the relational store are reached only through the
//! [`extract::Extractor`] and [`store::ReceiptStore`] traits.

// We intentionally use native `async fn` in traits.
#![allow(async_fn_in_trait)]

pub mod batch;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod normalize;
pub mod raw;
pub mod receipt;
pub mod report;
pub mod resolve;
pub mod store;

pub use error::{Error, Result};
