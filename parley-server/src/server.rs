use std::{
    str::FromStr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use anyhow::Context;
use axum::{
    Extension, Router,
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::config::server::{Config, DatabaseConfig, FanoutBackend, LogFormat, StorageBackend};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    app_state::{AppState, Backends},
    db::bootstrap,
    fanout::PgBus,
    middleware::request_context::{self, RequestContextState},
    routes,
    store::{PgMemberDirectory, PgThreadStore},
    tracer,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates a database connection pool with the configured statement timeout.
///
/// # Errors
/// Returns an error if the URL is malformed or no connection can be opened.
pub async fn create_database_pool(db: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(&db.url)?
        .options([("statement_timeout", db.statement_timeout_ms.to_string())]);
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect_with(options)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    Ok(pool)
}

/// Builds the application state over the configured backends.
///
/// With `db.storage = postgres` the pool is opened, the bootstrap scripts
/// applied and readiness checked before any service is wired.
///
/// # Errors
/// Returns an error if the database cannot be reached or bootstrapped, or
/// the push client cannot be built.
pub async fn create_app_state(config: Arc<Config>) -> anyhow::Result<Arc<AppState>> {
    let mut backends = Backends::in_memory(&config).context("building push client")?;

    if config.db.storage == StorageBackend::Postgres {
        let pool = create_database_pool(&config.db)
            .await
            .context("connecting to database")?;
        bootstrap::ensure_liveness(&pool).await?;
        bootstrap::run(&pool, &config.db).await?;
        bootstrap::ensure_readiness(&pool).await?;

        backends.threads = Arc::new(PgThreadStore::new(pool.clone()));
        backends.members = Arc::new(PgMemberDirectory::new(pool.clone()));
        if config.fanout.backend == FanoutBackend::Postgres {
            backends.bus = Arc::new(PgBus::start(pool.clone(), &config.fanout));
        }
        backends.pool = Some(pool);
    }

    info!(
        storage = ?config.db.storage,
        fanout = ?config.fanout.backend,
        "application state ready"
    );
    Ok(Arc::new(AppState::new(config, backends)))
}

/// Creates the CORS layer for the application.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    use axum::http::Method;

    let methods = vec![
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_credentials(config.server.cors.allow_credentials)
        .max_age(Duration::from_secs(config.server.cors.max_age_seconds));

    cors = if config.server.cors.allow_credentials {
        cors.allow_headers(AllowHeaders::mirror_request())
    } else {
        cors.allow_headers(AllowHeaders::any())
    };

    if config.server.cors.allowed_origins.is_empty() {
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins = config
            .server
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    cors
}

/// Creates the main application router with all middleware and routes.
///
/// # Arguments
/// * `state` - Application state to share across handlers.
/// * `metrics_handle` - Prometheus handle rendered at `/metrics`.
pub fn create_app_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let cors = create_cors_layer(state.config());
    let context_state = RequestContextState::from_config(state.config());

    Router::new()
        .merge(routes::api::create_api_router())
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(state.clone()))
        .layer(Extension(metrics_handle))
        .layer(cors)
        .layer(tracer::create_trace_layer())
        .layer(middleware::from_fn_with_state(
            context_state,
            request_context::assign_request_context,
        ))
        .with_state(state)
}

/// Resolves when CTRL+C is received.
pub async fn create_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

/// Starts the server and serves until a shutdown signal arrives.
///
/// # Errors
/// Returns an error if the backends cannot be prepared or the listener
/// cannot be bound.
pub async fn run(config: Config) -> anyhow::Result<()> {
    initialize_tracing(&config);
    info!(profile = ?config.profile, "Starting server...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);
    let state = create_app_state(config.clone()).await?;
    let app = create_app_router(state.clone(), metrics_handle);

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "binding {}:{}",
                config.server.host, config.server.port
            )
        })?;
    info!("Listening on {}", listener.local_addr()?);

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await?;

    state.drain_background().await;
    Ok(())
}
