// Textile Marketing API Library
//
// Lead intake pipeline and analytics reporting for the marketing site.

pub mod analytics;
pub mod config;
pub mod crm;
pub mod database;
pub mod email;
pub mod error;
pub mod handlers;
pub mod insights;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use database::Database;
pub use error::ApiError;
pub use metrics::AppMetrics;
pub use models::*;
pub use pipeline::LeadPipeline;
