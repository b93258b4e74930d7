//! Extraction adapters for `tally`.
//!
//! [`AzureExtractor`] sends receipt images to Azure Document Intelligence's
//! `prebuilt-receipt` model over REST. [`ReplayExtractor`] reads field bags
//! previously saved beside the images, so a batch can be re-ingested without
//! calling the service again.

mod client;
mod model;
mod replay;

pub use client::{AzureConfig, AzureExtractor};
pub use model::{AnalyzeOperation, AnalyzeResult, AnalyzedDocument, DocumentField};
pub use replay::ReplayExtractor;
