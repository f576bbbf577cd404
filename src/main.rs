// grid-search/src/main.rs
use grid_search::api::start_api_server;
use grid_search::backend::OllamaBackend;
use grid_search::config::ApiConfig;
use grid_search::db::schema_init::SchemaInitializer;
use grid_search::db::settings::{self, AppSettings};
use grid_search::db::shared;
use grid_search::monitoring::{init_tracing, MonitoringConfig};
use grid_search::AppState;
use std::io;
use std::sync::Arc;
use tracing::info;

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Load configuration first (reads .env unless NO_DOTENV is set)
    let config = ApiConfig::from_env().map_err(io::Error::other)?;
    let pm = &config.path_manager;

    let monitoring = MonitoringConfig::from_env(pm.logs_dir());
    let _log_guard = init_tracing(&monitoring)?;

    info!(home = %pm.base_dir().display(), "Initializing database");
    let conn = SchemaInitializer::open(pm).map_err(io::Error::other)?;

    // Saved settings win over the environment defaults
    let fallback = AppSettings {
        server_url: config.ollama_url.clone(),
        request_timeout: config.request_timeout,
        ..AppSettings::default()
    };
    let settings = settings::load_settings(&conn, fallback).map_err(io::Error::other)?;
    info!(
        server_url = %settings.server_url,
        request_timeout = settings.request_timeout,
        "Settings loaded"
    );

    let state = Arc::new(AppState::new(
        shared(conn),
        Arc::new(OllamaBackend::new()),
        settings,
    ));

    info!(bind_addr = %config.bind_addr(), "Starting API server");
    start_api_server(&config, state)?.await
}
