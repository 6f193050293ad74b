use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_server::api::{self, AppState};
use courier_server::config::ServerConfig;
use courier_server::db::SharedDb;
use courier_server::delivery::Delivery;
use courier_server::media::UrlMediaPolicy;
use courier_server::presence::PresenceRegistry;
use courier_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,courier_server=debug,courier_store=info")
            }),
        )
        .init();

    info!("Starting Courier server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let database = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database ready");

    let delivery = Delivery::new(
        SharedDb::new(database),
        PresenceRegistry::new(),
        Arc::new(UrlMediaPolicy::new(config.max_document_size)),
        &config,
    );

    let http_addr = config.http_addr;
    let app_state = AppState {
        delivery,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
