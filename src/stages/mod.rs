//! Stage runners: one per report chapter plus the extraction and
//! previous-report stages.
//!
//! A runner consumes prior artifacts through the shared context, produces
//! one chapter result JSON and embeds `finding` objects the controller
//! harvests afterwards. Runners never write another stage's output.

pub mod chapter_1;
pub mod chapter_3;
pub mod chapter_4;
pub mod chapter_5;
pub mod chapter_7;
pub mod gs_extraction;
pub mod scan_report;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;

use crate::ai::{AiError, AiGateway};
use crate::catalog::ControlCatalog;
use crate::config::AppConfig;
use crate::finder::{DocumentFinder, FinderError};
use crate::gscheck::GsCheckError;
use crate::store::{paths, ObjectStore, StoreError};

/// All stages, in no particular order. Execution order is the
/// controller's topological sort over `prerequisites()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    ScanReport,
    GsCheckExtraction,
    Chapter1,
    Chapter3,
    Chapter4,
    Chapter5,
    Chapter7,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScanReport => "Scan-Report",
            Self::GsCheckExtraction => "Grundschutz-Check-Extraction",
            Self::Chapter1 => "Chapter-1",
            Self::Chapter3 => "Chapter-3",
            Self::Chapter4 => "Chapter-4",
            Self::Chapter5 => "Chapter-5",
            Self::Chapter7 => "Chapter-7",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Scan-Report" => Some(Self::ScanReport),
            "Grundschutz-Check-Extraction" => Some(Self::GsCheckExtraction),
            "Chapter-1" => Some(Self::Chapter1),
            "Chapter-3" => Some(Self::Chapter3),
            "Chapter-4" => Some(Self::Chapter4),
            "Chapter-5" => Some(Self::Chapter5),
            "Chapter-7" => Some(Self::Chapter7),
            _ => None,
        }
    }

    /// Execution order for a full run.
    pub fn all_in_order() -> &'static [StageName] {
        &[
            Self::GsCheckExtraction,
            Self::ScanReport,
            Self::Chapter1,
            Self::Chapter3,
            Self::Chapter7,
            Self::Chapter4,
            Self::Chapter5,
        ]
    }

    /// The chapter reference used in finding `source_chapter` fields.
    pub fn source_ref(&self) -> &'static str {
        match self {
            Self::ScanReport => "Scan-Report",
            Self::GsCheckExtraction => "Grundschutz-Check-Extraction",
            Self::Chapter1 => "1",
            Self::Chapter3 => "3",
            Self::Chapter4 => "4",
            Self::Chapter5 => "5",
            Self::Chapter7 => "7",
        }
    }

    /// Whether the stage's output already exists in the store. The
    /// extraction stage is complete when its intermediate artifacts are,
    /// every other stage when its result JSON is.
    pub fn output_exists(&self, ctx: &StageContext) -> Result<bool, StoreError> {
        match self {
            Self::GsCheckExtraction => Ok(ctx
                .store
                .exists(&ctx.config.output_key(paths::SYSTEM_STRUCTURE_MAP))?
                && ctx
                    .store
                    .exists(&ctx.config.output_key(paths::EXTRACTED_CHECK_MERGED))?),
            _ => ctx
                .store
                .exists(&ctx.config.stage_result_key(self.as_str())),
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("missing prerequisite for stage: {0}")]
    MissingPrerequisite(String),

    #[error("AI error: {0}")]
    Ai(#[from] AiError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("finder error: {0}")]
    Finder(#[from] FinderError),

    #[error("extraction error: {0}")]
    GsCheck(#[from] GsCheckError),

    #[error("invalid stage data: {0}")]
    Invalid(String),
}

/// Shared read-only context handed to every runner.
pub struct StageContext {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ObjectStore>,
    pub ai: Arc<AiGateway>,
    pub finder: Arc<DocumentFinder>,
    pub catalog: Arc<ControlCatalog>,
    /// Date of the run; reference point for recency checks.
    pub run_date: NaiveDate,
}

#[async_trait]
pub trait StageRunner: Send + Sync {
    fn name(&self) -> StageName;

    /// Stages whose outputs must exist before this one may run.
    fn prerequisites(&self) -> Vec<StageName> {
        Vec::new()
    }

    /// Executes the stage and returns its result JSON. `force` propagates
    /// to idempotent substeps (they re-run instead of loading caches).
    async fn run(&self, ctx: &StageContext, force: bool) -> Result<Value, StageError>;
}

/// The full runner set for a pipeline run.
pub fn all_runners() -> Vec<Box<dyn StageRunner>> {
    vec![
        Box::new(gs_extraction::GsCheckExtractionRunner),
        Box::new(scan_report::ScanReportRunner),
        Box::new(chapter_1::Chapter1Runner),
        Box::new(chapter_3::Chapter3Runner),
        Box::new(chapter_7::Chapter7Runner),
        Box::new(chapter_4::Chapter4Runner),
        Box::new(chapter_5::Chapter5Runner),
    ]
}
