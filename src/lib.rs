pub mod ai;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod finder;
pub mod gscheck;
pub mod models;
pub mod prompts;
pub mod report;
pub mod stages;
pub mod store;

use tracing_subscriber::EnvFilter;

/// Initializes tracing. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}
