pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod runtime;

use std::sync::Arc;

use config::AppConfig;
use engine::background::{start_session_poller, stop_session_poller};
use engine::lifecycle::ProtocolLifecycle;
use engine::poller::SessionPoller;
use error::AppError;
use runtime::client::RuntimeClient;
use runtime::SessionReader;

/// Run the service until Ctrl-C: load config, open the database, and drive
/// the session poller.
pub async fn run() -> Result<(), AppError> {
    logging::init();

    tracing::info!("Starting protocol-handoff v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load()?;
    let pool = db::init_db(&config.database_path)?;

    let reader: Arc<dyn SessionReader> = Arc::new(RuntimeClient::new(&config.runtime)?);
    let lifecycle = Arc::new(ProtocolLifecycle::new(
        pool,
        reader.clone(),
        config.protocol.number_prefix.clone(),
    ));
    let poller = Arc::new(SessionPoller::new(lifecycle, reader, config.poller.clone()));

    start_session_poller(&poller);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    stop_session_poller(&poller);
    let stats = poller.state().stats();
    tracing::info!(
        cycles = stats.cycles_completed,
        protocols_created = stats.protocols_created,
        escalations = stats.escalations_raised,
        surveys = stats.surveys_answered,
        failures = stats.session_failures,
        "Session poller final stats"
    );
    Ok(())
}
