//! Grundschutz-Check extraction: ground-truth-driven semantic chunking.
//!
//! The check document is a long, table-heavy PDF with one chapter per
//! Zielobjekt. Reconstruction runs in phases:
//!
//! 1. ground truth — build the authoritative system structure map
//! 2. header index — locate per-Zielobjekt sections by page
//! 3. chunking — split long sections into overlapping page ranges
//! 4. refinement — per-chunk structured extraction (parallel)
//! 5. merge — de-duplicate and reconcile into the final requirement list
//! 6. analysis — answer the five audit questions for subchapter 3.6.1

pub mod analysis;
pub mod chunker;
pub mod ground_truth;
pub mod header_index;
pub mod merge;
pub mod refiner;

use thiserror::Error;

use crate::ai::AiError;
use crate::finder::FinderError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum GsCheckError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("AI error: {0}")]
    Ai(#[from] AiError),

    #[error("finder error: {0}")]
    Finder(#[from] FinderError),

    #[error("PDF processing failed: {0}")]
    Pdf(String),

    #[error("required document missing: {0}")]
    MissingDocument(String),

    #[error("invalid intermediate data: {0}")]
    InvalidData(String),
}
