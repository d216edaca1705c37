//! CLI entry point for the audit pipeline.
//!
//! Exit codes: 0 success, 2 bad configuration, 3 missing prerequisite
//! for a requested stage, 4 at least one stage failed.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use pruefwerk::ai::{AiGateway, HttpProvider};
use pruefwerk::catalog::ControlCatalog;
use pruefwerk::config::AppConfig;
use pruefwerk::controller::{AuditController, ControllerError};
use pruefwerk::finder::DocumentFinder;
use pruefwerk::report::ReportAssembler;
use pruefwerk::stages::{all_runners, StageContext};
use pruefwerk::store::LocalStore;

#[derive(Parser)]
#[command(name = "pruefwerk", about = "BSI Grundschutz audit automation pipeline")]
struct Cli {
    /// Run every stage, skipping those already completed.
    #[arg(long, conflicts_with_all = ["run_stage", "generate_report"])]
    run_all: bool,

    /// Run exactly one stage (e.g. --run-stage Chapter-4).
    #[arg(long, value_name = "STAGE", conflicts_with = "generate_report")]
    run_stage: Option<String>,

    /// Assemble the final report from completed stage results.
    #[arg(long)]
    generate_report: bool,

    /// Re-run stages whose output already exists.
    #[arg(long)]
    force: bool,
}

const EXIT_CONFIG: u8 = 2;
const EXIT_MISSING_PREREQUISITE: u8 = 3;
const EXIT_STAGE_FAILED: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    pruefwerk::init_logging();
    let cli = Cli::parse();

    if !cli.run_all && cli.run_stage.is_none() && !cli.generate_report {
        eprintln!("one of --run-all, --run-stage <STAGE>, --generate-report is required");
        return ExitCode::from(EXIT_CONFIG);
    }

    let config = match AppConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let store = Arc::new(LocalStore::new(config.store_root.clone()));

    if cli.generate_report {
        tracing::info!("starting final report assembly");
        return match ReportAssembler::new(&config, store.as_ref()).assemble() {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "report assembly failed");
                ExitCode::from(EXIT_STAGE_FAILED)
            }
        };
    }

    let provider = match HttpProvider::new(&config.ai_base_url, &config.ai_model, store.clone()) {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            tracing::error!(error = %e, "cannot construct AI provider");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let ai = Arc::new(AiGateway::new(provider, config.max_concurrent_ai_requests));

    let catalog = match ControlCatalog::load() {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            tracing::error!(error = %e, "cannot load control catalog");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let finder = Arc::new(DocumentFinder::new(config.clone(), store.clone()));
    if let Err(e) = finder.ensure_initialized(&ai).await {
        tracing::error!(error = %e, "document finder initialization failed");
        return ExitCode::from(EXIT_CONFIG);
    }

    let ctx = StageContext {
        config: config.clone(),
        store,
        ai,
        finder,
        catalog,
        run_date: chrono::Utc::now().date_naive(),
    };
    let controller = AuditController::new(ctx, all_runners());

    if let Some(stage) = cli.run_stage {
        return match controller.run_stage(&stage).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e @ ControllerError::MissingPrerequisite { .. })
            | Err(e @ ControllerError::UnknownStage(_)) => {
                tracing::error!(error = %e, "cannot run stage");
                ExitCode::from(EXIT_MISSING_PREREQUISITE)
            }
            Err(e) => {
                tracing::error!(error = %e, "stage run failed");
                ExitCode::from(EXIT_STAGE_FAILED)
            }
        };
    }

    match controller.run_all(cli.force).await {
        Ok(summary) => {
            for outcome in &summary.stages {
                tracing::info!(
                    stage = %outcome.stage,
                    status = ?outcome.status,
                    detail = outcome.detail.as_deref().unwrap_or(""),
                    "stage outcome"
                );
            }
            if summary.any_failed() {
                ExitCode::from(EXIT_STAGE_FAILED)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "pipeline run failed");
            ExitCode::from(EXIT_STAGE_FAILED)
        }
    }
}
