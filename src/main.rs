use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use tablecast::{
    config::ServerConfig, handle_websocket, health_check, load_well_log, registry::TableRegistry,
    runloop::RunLoop, state::AppState, WellLogProducer,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablecast=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; invalid values are fatal before anything starts
    let config = ServerConfig::from_env()?;

    // The runtime is built by hand so executor-mode dispatch runs on a
    // blocking pool of known size
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.executor_threads)
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    info!("🚀 Starting tablecast");

    // Load the source dataset once, before streaming begins
    let source = load_well_log(&config.data_path)
        .with_context(|| format!("loading dataset {}", config.data_path.display()))?;

    let registry = TableRegistry::new(config.dispatch_timeout);
    let producer = WellLogProducer::new(&config.table_name, source, config.max_rows)?;

    // The worker thread owns the table and the tick timer; it is detached
    // and torn down with the process
    let run_loop = RunLoop::spawn(
        vec![Box::new(producer)],
        &registry,
        config.tick_interval,
        config.tick_jitter,
        config.dispatch_mode,
        tokio::runtime::Handle::current(),
    )?;
    registry.set_dispatcher(run_loop.dispatcher())?;

    let static_dir = config.static_dir.clone();
    let bind_address = config.bind_address();
    let table_name = config.table_name.clone();
    let state = Arc::new(AppState::new(config, registry));

    // Build router
    let app = Router::new()
        .route("/ws/{table}", get(handle_websocket))
        .route("/health", get(health_check))
        .fallback_service(ServeDir::new(static_dir).append_index_html_on_directories(true))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = bind_address.parse()?;
    info!("🎧 Listening on http://{}", addr);
    info!("📡 Table endpoint: ws://{}/ws/{}", addr, table_name);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
