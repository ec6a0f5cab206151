use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lesprivate_api::config::ApiConfig;
use lesprivate_api::gateways::XenditGateway;
use lesprivate_api::handlers::handler_404;
use lesprivate_api::scheduler::SweepScheduler;
use lesprivate_api::{routes, AppState};
use lesprivate_common::RedisService;
use lesprivate_database::{connect, create_pool, run_migrations, Database};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lesprivate_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = ApiConfig::from_env()?;

    // Database pools: primary for writes, optional replica for reads
    let writer = create_pool(&config.database).await?;
    if config.enable_migration {
        run_migrations(&writer).await?;
    }
    let reader = match &config.database_read {
        Some(read_config) => Some(connect(read_config).await?),
        None => None,
    };
    let db = Database::new(writer, reader, config.transaction_retries);

    let redis = RedisService::new(&config.redis).await?;
    let gateway = Arc::new(XenditGateway::new(&config.gateway)?);

    let state = AppState::build(config.clone(), db, Some(redis), gateway)?;

    let scheduler = if config.sweeps.cron_enabled {
        let scheduler = SweepScheduler::new(state.sweeps.clone(), &config.sweeps.cron_expression).await?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        None
    };

    let origins = config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
        .allow_origin(origins);

    let app = routes::create_routes(state.jwt.clone())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.server.request_timeout_secs,
                ))),
        )
        .with_state(state)
        .fallback(handler_404);

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.server.host, config.server.port)).await?;

    tracing::info!("Lesprivate API listening on {}:{}", config.server.host, config.server.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    tracing::info!("Lesprivate API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
