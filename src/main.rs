// Textile Marketing API
//
// Lead intake (validate -> persist -> fan out to CRM and email) plus
// KPI/insight reporting endpoints over the GA4 Data API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

mod analytics;
mod config;
mod crm;
mod database;
mod email;
mod error;
mod handlers;
mod insights;
mod metrics;
mod models;
mod pipeline;
mod rate_limit;
mod validation;

use analytics::GaClient;
use config::Config;
use crm::HubSpotClient;
use database::Database;
use email::ResendMailer;
use handlers::AppState;
use metrics::AppMetrics;
use pipeline::LeadPipeline;
use rate_limit::{
    InMemoryRateLimitStore, RateLimitConfig, RateLimitStore, RateLimiter, RedisRateLimitStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "textile_marketing_api=info,sqlx=warn".into()),
        )
        .init();

    let config = Config::parse();
    info!("Starting textile marketing API");
    info!("  - Bind address: {}", config.bind_address);
    info!(
        "  - Rate limit: {} requests / {}ms",
        config.rate_limit_max_requests, config.rate_limit_window_ms
    );
    info!("  - CRM sync: {}", enabled(config.hubspot_api_key.is_some()));
    info!("  - Email: {}", enabled(config.resend_api_key.is_some()));
    info!(
        "  - Analytics: {}",
        enabled(config.ga_property_id.is_some() && config.ga_access_token.is_some())
    );

    let database = Arc::new(Database::new(&config.database_url, config.db_pool_size).await?);
    database.setup_schema().await?;

    let metrics = Arc::new(AppMetrics::new());

    // Bounded timeout on every outbound integration call.
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()?;

    let rate_limit_store: Arc<dyn RateLimitStore> = match config.redis_url.as_deref() {
        Some(redis_url) => {
            info!("  - Rate-limit store: redis");
            Arc::new(RedisRateLimitStore::connect(redis_url).await?)
        }
        None => {
            // Process-local counters only work for a single instance.
            warn!("  - Rate-limit store: in-memory (single-instance only)");
            Arc::new(InMemoryRateLimitStore::new())
        }
    };
    let limiter = RateLimiter::new(
        rate_limit_store,
        RateLimitConfig {
            window_ms: config.rate_limit_window_ms,
            max_requests: config.rate_limit_max_requests,
        },
    );

    let crm = Arc::new(HubSpotClient::new(http.clone(), config.hubspot_api_key.clone()));
    let notifier = Arc::new(ResendMailer::new(
        http.clone(),
        config.resend_api_key.clone(),
        config.resend_from_email.clone(),
        config.resend_to_email.clone(),
    ));
    let analytics = GaClient::from_config(
        http,
        config.ga_property_id.clone(),
        config.ga_access_token.clone(),
    )
    .map(Arc::new);

    let pipeline = Arc::new(LeadPipeline::new(
        limiter,
        database.clone(),
        crm,
        notifier.clone(),
        metrics.clone(),
    ));

    let state = AppState {
        pipeline,
        database: database.clone(),
        notifier,
        analytics,
        metrics,
        analytics_api_key: config.analytics_api_key.clone(),
        started_at: Instant::now(),
    };

    let app = Router::new()
        .route("/api/leads", post(handlers::submit_lead).get(handlers::list_leads))
        .route("/api/newsletter", post(handlers::subscribe_newsletter))
        .route("/api/analytics/kpis", get(handlers::get_kpis))
        .route("/api/analytics/insights", get(handlers::get_insights))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Listening on http://{}", config.bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}

fn enabled(on: bool) -> &'static str {
    if on {
        "enabled"
    } else {
        "disabled"
    }
}
