//! HTTP server startup.
//!
//! Brings up tracing and metrics, optionally provisions weights, starts the engine pool and
//! serves the API until SIGINT/SIGTERM. Shutdown kills every engine without draining.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    api,
    bootstrap::WeightBootstrap,
    config::Config,
    engine::EngineSupervisor,
    shared_state::AppState,
};

/// Run the relay until a shutdown signal arrives.
pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::metrics::init_metrics()?;
    cfg.print_config();

    if cfg.bootstrap_weights {
        let bootstrap = WeightBootstrap::new(cfg.weight_mirrors.clone());
        if let Err(e) = bootstrap.ensure(&cfg.engines).await {
            warn!("[weights] bootstrap failed: {:#}", e);
        }
    }

    let supervisor = EngineSupervisor::new(&cfg.registry(), cfg.supervisor_settings());
    supervisor.start_all();

    let addr = cfg.api_addr()?;
    let state = AppState::new(cfg, supervisor.clone());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(supervisor))
        .await?;

    Ok(())
}

/// Validate every configured engine without serving. Fails if none can run.
pub fn check_engines(cfg: &Config) -> anyhow::Result<()> {
    let mut usable = 0;
    for def in cfg.registry().iter() {
        match def.validate() {
            Ok(exe) => {
                usable += 1;
                info!("[{}] ok ({})", def.name, exe.display());
            }
            Err(e) => warn!("[{}] DISABLED ({})", def.name, e),
        }
    }
    if usable == 0 {
        anyhow::bail!("no engine is usable");
    }
    info!("{} of {} engines usable", usable, cfg.engines.len());
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    // Strongest-first may walk every engine before answering.
    let engines = state.config.engines.len() as u32;
    let request_timeout = Duration::from_millis(state.config.request_timeout_ms) * (engines + 1);
    let body_limit = state.config.body_limit_bytes;
    let static_dir = state.config.static_dir.clone();

    let api = Router::new()
        .route("/engines", get(api::list_engines))
        .route("/analyze", post(api::analyze))
        .route("/eval", post(api::eval));

    let router = Router::new()
        .route("/healthz", get(api::healthz))
        .route("/metrics", get(api::metrics_handler))
        .nest("/api", api);

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

async fn shutdown_signal(supervisor: Arc<EngineSupervisor>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    supervisor.shutdown();
}
