//! Artifact types shared across the pipeline.
//!
//! Everything here is a serde type with a stable on-disk JSON contract.
//! German field names (`kuerzel`, `umsetzungsstatus`, …) are part of that
//! contract and must not be renamed.

pub mod document;
pub mod finding;
pub mod requirement;
pub mod structure;

pub use document::{DocumentCategory, DocumentMap, DocumentMapEntry};
pub use finding::{Finding, FindingCategory};
pub use requirement::{Requirement, UmsetzungsStatus};
pub use structure::{BausteinAssignment, SystemStructureMap, Zielobjekt, INFORMATIONSVERBUND};
