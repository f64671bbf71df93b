// Configuration Management
//
// All deployment knobs come from the environment (or CLI flags for
// local runs). Integration credentials are optional: a missing key
// disables that integration rather than failing startup.

use clap::Parser;

/// Command line and environment variable configuration for the service
#[derive(Parser, Debug, Clone)]
#[clap(name = "textile-marketing-api")]
#[clap(about = "Lead intake and analytics reporting backend")]
pub struct Config {
    /// PostgreSQL connection URL (source of truth for leads/subscriptions)
    #[clap(long, env = "DATABASE_URL", default_value = "postgres://localhost/textile_marketing")]
    pub database_url: String,

    /// Database connection pool size
    #[clap(long, env = "DB_POOL_SIZE", default_value = "10")]
    pub db_pool_size: u32,

    /// Optional Redis URL; when set, rate-limit counters are shared
    /// across instances instead of kept in process memory
    #[clap(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// HTTP server bind address
    #[clap(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:3000")]
    pub bind_address: String,

    /// Rate-limit window applied to lead submissions, in milliseconds
    #[clap(long, env = "RATE_LIMIT_WINDOW_MS", default_value = "900000")]
    pub rate_limit_window_ms: u64,

    /// Maximum lead submissions per client per window
    #[clap(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value = "5")]
    pub rate_limit_max_requests: u32,

    /// Timeout for outbound HTTP calls (CRM, email, analytics), seconds
    #[clap(long, env = "HTTP_TIMEOUT_SECS", default_value = "10")]
    pub http_timeout_secs: u64,

    /// HubSpot private app token; absent disables CRM sync
    #[clap(long, env = "HUBSPOT_API_KEY")]
    pub hubspot_api_key: Option<String>,

    /// Resend API key; absent disables all outbound email
    #[clap(long, env = "RESEND_API_KEY")]
    pub resend_api_key: Option<String>,

    /// From address for transactional email
    #[clap(long, env = "RESEND_FROM_EMAIL", default_value = "noreply@example.com")]
    pub resend_from_email: String,

    /// Internal recipient for new-lead alerts
    #[clap(long, env = "RESEND_TO_EMAIL", default_value = "sales@example.com")]
    pub resend_to_email: String,

    /// GA4 property ID for the reporting endpoints
    #[clap(long, env = "GA_PROPERTY_ID")]
    pub ga_property_id: Option<String>,

    /// OAuth bearer token for the GA4 Data API
    #[clap(long, env = "GA_ACCESS_TOKEN")]
    pub ga_access_token: Option<String>,

    /// Shared secret checked against the x-api-key header on the
    /// analytics endpoints; unset disables the check
    #[clap(long, env = "ANALYTICS_API_KEY")]
    pub analytics_api_key: Option<String>,
}
