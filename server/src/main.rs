use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voxmark_server::config::Config;
use voxmark_server::segmentation::ThresholdGrowPipeline;
use voxmark_server::session::{DiskScratch, SessionConfig, SessionManager};
use voxmark_server::volume::{SliceCache, SliceCacheConfig, UploadDecoder};
use voxmark_server::{AppState, api_routes};

/// Application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Ensure a directory exists, creating it if necessary.
fn ensure_directory(path: &Path, name: &str) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        info!("Created {} directory: {:?}", name, path);
        Ok(())
    } else if path.is_dir() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} path {:?} exists but is not a directory", name, path),
        ))
    }
}

#[derive(Serialize)]
struct MetricsResponse {
    /// Server uptime in seconds
    uptime_seconds: u64,
    /// Server version
    version: &'static str,
    /// Number of live sessions
    active_sessions: usize,
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    Json(MetricsResponse {
        uptime_seconds: uptime,
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: state.manager.session_count().await,
    })
}

/// Prometheus metrics handle for exposing metrics in Prometheus format
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => handle.render().into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Prometheus recorder not installed",
        )
            .into_response(),
    }
}

/// Update gauge metrics (called periodically)
async fn update_gauge_metrics(state: &AppState) {
    let sessions = state.manager.session_count().await;
    metrics::gauge!("voxmark_sessions_active").set(sessions as f64);

    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);
    metrics::gauge!("voxmark_uptime_seconds").set(uptime as f64);
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Record server start time
    START_TIME.set(Instant::now()).ok();

    // Initialize Prometheus metrics recorder (must be done before any metrics are recorded)
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    PROMETHEUS_HANDLE.set(prometheus_handle).ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxmark=debug,voxmark_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}, session timeout={:?}",
        config.host, config.port, config.session.timeout
    );

    let scratch_dir = &config.session.scratch_dir;
    ensure_directory(scratch_dir, "scratch")
        .with_context(|| format!("Scratch directory {:?} is unusable", scratch_dir))?;

    let session_config = SessionConfig {
        timeout: config.session.timeout,
        reclaim_interval: config.session.reclaim_interval,
    };
    let manager = SessionManager::start(session_config, Arc::new(DiskScratch::new(scratch_dir)));

    let slice_cache = SliceCache::new(SliceCacheConfig {
        max_size_bytes: config.slice.cache_max_size,
        ..SliceCacheConfig::default()
    });
    let app_state = AppState::new(manager.clone())
        .with_decoder(Arc::new(UploadDecoder::new(
            config.upload.max_decompressed_size,
        )))
        .with_pipeline(Arc::new(ThresholdGrowPipeline::new(
            config.segmentation.radius,
            config.segmentation.min_threshold,
        )))
        .with_slice_cache(Arc::new(slice_cache))
        .with_max_upload_bytes(config.upload.max_upload_size);

    // Periodic update of gauge metrics (every 5 seconds)
    let metrics_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            update_gauge_metrics(&metrics_state).await;
        }
    });

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/metrics", get(metrics))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .with_state(app_state.clone())
        .merge(api_routes(app_state))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Add static file serving if configured
    let app = if let Some(ref static_dir) = config.static_files.dir {
        if static_dir.exists() {
            info!("Serving static files from: {:?}", static_dir);

            // ServeDir with SPA fallback: serve index.html for any unmatched routes
            let index_path = static_dir.join("index.html");
            let serve_dir =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_path));

            let static_service = ServiceBuilder::new()
                .layer(CompressionLayer::new())
                .service(serve_dir);

            app.fallback_service(static_service)
        } else {
            warn!(
                "Static files directory not found: {:?} - static file serving disabled",
                static_dir
            );
            app
        }
    } else {
        info!("Static file serving disabled (STATIC_FILES_DIR not set)");
        app
    };

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Voxmark server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let released = manager.shutdown().await;
    info!("Released {} sessions on shutdown", released);

    Ok(())
}
