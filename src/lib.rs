pub mod api;
pub mod config;
pub mod models;
pub mod pipeline;

use tracing_subscriber::EnvFilter;

pub use config::ScanConfig;
pub use models::{ExtractionRecord, FinalResult, ProductRecord};
pub use pipeline::{Orchestrator, ScanError, ScanState};

/// Install the global `tracing` subscriber. `RUST_LOG` wins over
/// `config::default_log_filter()`. Logs go to stderr so stdout stays clean
/// for results. A second call is a no-op.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
    }
}
