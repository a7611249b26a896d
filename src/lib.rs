//! Credit-metered document summarization
//!
//! Users spend credits to submit documents; a background worker sends each
//! one to a hosted summarization model, records the outcome and notifies the
//! user.

pub mod adapters;
pub mod app;
pub mod config;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use app::{App, AppError};

use std::time::Duration;
use tracing::{error, info};

use crate::config::Settings;

/// How often the process checks that the worker is still alive
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Run the worker until Ctrl-C
pub async fn run() -> Result<(), AppError> {
    let settings = Settings::load()?;
    let _log_guard = utils::logging::init_logging(settings.log_dir.as_deref())?;

    info!("Opening database at {:?}", settings.database_path);
    let app = App::build(&settings)?;
    app.supervisor.start()?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
            _ = health.tick() => {
                if let Err(e) = app.supervisor.restart_if_crashed() {
                    error!("Failed to restart worker: {}", e);
                }
            }
        }
    }

    info!("Shutting down");
    app.supervisor.stop().await?;
    Ok(())
}
