//! Canonical artifact keys under the output prefix.
//!
//! Every stage reads and writes through these helpers so the blob layout
//! stays consistent across resume, force and report assembly.

use crate::config::AppConfig;

pub const DOCUMENT_MAP: &str = "document_map.json";
pub const SYSTEM_STRUCTURE_MAP: &str = "results/intermediate/system_structure_map.json";
pub const EXTRACTED_CHECK_MERGED: &str =
    "results/intermediate/extracted_grundschutz_check_merged.json";
pub const GS_CHUNK_PDF_PREFIX: &str = "results/intermediate/gs_chunks/";
pub const GS_INDIVIDUAL_PREFIX: &str = "results/intermediate/gs_individual/";
pub const ALL_FINDINGS: &str = "results/all_findings.json";
pub const RUN_SUMMARY: &str = "results/run_summary.json";
pub const FINAL_REPORT: &str = "final_audit_report.json";

impl AppConfig {
    pub fn output_key(&self, rel: &str) -> String {
        format!("{}{rel}", self.output_prefix)
    }

    pub fn stage_result_key(&self, stage: &str) -> String {
        format!("{}results/{stage}.json", self.output_prefix)
    }

    pub fn source_key(&self, filename: &str) -> String {
        format!("{}{filename}", self.source_prefix)
    }
}
