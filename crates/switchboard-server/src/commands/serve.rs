use switchboard::storage::StorageManager;
use switchboard::store::ChatStore;
use switchboard::{config, sync};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::configuration::Settings;
use crate::{logging, routes, state};

use anyhow::Result;

pub async fn run() -> Result<()> {
    let _log_guard = logging::setup_logging("switchboardd")?;

    let settings = Settings::new()?;
    info!("Configuration loaded: {:?}", settings);

    if let Some(parent) = settings.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let storage = StorageManager::open(&settings.db_path).await?;
    let store = ChatStore::new(storage.pool().clone());

    if let Some(agents_file) = &settings.agents_file {
        let agents = sync::load_agents_config(agents_file)?;
        sync::sync_agents(&store, &agents).await?;
    }

    let state = state::AppState::new(store, config::agent_timeout());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.socket_addr()).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
