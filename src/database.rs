// Persistence Layer
//
// PostgreSQL is the source of truth for leads and newsletter
// subscriptions. Schema is created at startup; inserts rely on the
// database's native atomicity, so concurrent submissions cannot
// corrupt each other's rows.

use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{error, info};
use uuid::Uuid;

use crate::models::{Lead, LeadStatus, SubscribeOutcome, ValidatedLead};

/// Store seam used by the ingestion pipeline, kept narrow so tests can
/// substitute an in-memory fake.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Persist a validated lead. Atomic: either a fully-formed row
    /// exists afterwards or none does.
    async fn create_lead(&self, lead: &ValidatedLead) -> Result<Lead, sqlx::Error>;

    /// Record the external CRM id once a sync succeeds. Idempotent and
    /// best-effort: runs after the response was already sent, so
    /// failures are logged rather than escalated.
    async fn update_lead_crm_id(&self, lead_id: Uuid, crm_id: &str);
}

/// Store seam for newsletter subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Subscribe an email to the newsletter. Idempotent: at most one
    /// row per email ever exists. A repeat call reactivates an
    /// unsubscribed row or reports already-subscribed; it never
    /// creates a duplicate.
    async fn subscribe_newsletter(
        &self,
        email: &str,
        source: &str,
    ) -> Result<SubscribeOutcome, sqlx::Error>;
}

/// Database provides all PostgreSQL operations with connection pooling
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str, pool_size: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .min_connections((pool_size / 2).max(1))
            .acquire_timeout(StdDuration::from_secs(5))
            .idle_timeout(StdDuration::from_secs(600))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Setup database schema with indexes for the listing queries
    pub async fn setup_schema(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS \"uuid-ossp\";")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
        CREATE TABLE IF NOT EXISTS leads (
            id UUID PRIMARY KEY DEFAULT uuid_generate_v4(),
            email VARCHAR NOT NULL,
            name VARCHAR,
            phone VARCHAR,
            company VARCHAR,
            message TEXT NOT NULL,
            source VARCHAR NOT NULL DEFAULT 'web',
            referrer VARCHAR,
            metadata JSONB NOT NULL DEFAULT '{}',
            status VARCHAR NOT NULL DEFAULT 'new',
            crm_id VARCHAR,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
        CREATE TABLE IF NOT EXISTS newsletter_subscriptions (
            id UUID PRIMARY KEY DEFAULT uuid_generate_v4(),
            email VARCHAR UNIQUE NOT NULL,
            status VARCHAR NOT NULL DEFAULT 'active',
            source VARCHAR NOT NULL DEFAULT 'web',
            metadata JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_leads_status_created ON leads(status, created_at DESC);")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_leads_created ON leads(created_at DESC);")
            .execute(&self.pool)
            .await?;

        info!("Database schema setup complete");
        Ok(())
    }

    /// List leads newest-first with optional status filter. Returns the
    /// page plus the total matching count for pagination.
    pub async fn list_leads(
        &self,
        status: Option<LeadStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Lead>, i64), sqlx::Error> {
        let status_str = status.map(|s| s.as_str());

        let leads = sqlx::query_as::<_, Lead>(
            r#"
            SELECT id, email, name, phone, company, message, source, referrer,
                   metadata, status, crm_id, created_at, updated_at
            FROM leads
            WHERE ($1::varchar IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status_str)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM leads WHERE ($1::varchar IS NULL OR status = $1)",
        )
        .bind(status_str)
        .fetch_one(&self.pool)
        .await?;

        Ok((leads, total))
    }

    /// Single round trip used by the health endpoint.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LeadStore for Database {
    async fn create_lead(&self, lead: &ValidatedLead) -> Result<Lead, sqlx::Error> {
        let metadata = serde_json::to_value(&lead.metadata).unwrap_or_default();

        sqlx::query_as::<_, Lead>(
            r#"
            INSERT INTO leads (email, name, phone, company, message, source, referrer, metadata, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'new')
            RETURNING id, email, name, phone, company, message, source, referrer,
                      metadata, status, crm_id, created_at, updated_at
            "#,
        )
        .bind(&lead.email)
        .bind(&lead.name)
        .bind(&lead.phone)
        .bind(&lead.company)
        .bind(&lead.message)
        .bind(&lead.source)
        .bind(&lead.referrer)
        .bind(&metadata)
        .fetch_one(&self.pool)
        .await
    }

    async fn update_lead_crm_id(&self, lead_id: Uuid, crm_id: &str) {
        let result = sqlx::query(
            "UPDATE leads SET crm_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(lead_id)
        .bind(crm_id)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!("failed to record CRM id for lead {}: {}", lead_id, e);
        }
    }
}

#[async_trait]
impl SubscriptionStore for Database {
    async fn subscribe_newsletter(
        &self,
        email: &str,
        source: &str,
    ) -> Result<SubscribeOutcome, sqlx::Error> {
        let metadata = serde_json::json!({
            "subscribedAt": chrono::Utc::now().to_rfc3339(),
            "source": source,
        });

        // Single upsert so two concurrent first-time subscribes cannot
        // race past the unique constraint. An already-active row is
        // excluded from the update and returns no row at all; for the
        // rest, xmax = 0 distinguishes a fresh insert from a
        // reactivation.
        let row = sqlx::query(
            r#"
            INSERT INTO newsletter_subscriptions (email, status, source, metadata)
            VALUES ($1, 'active', $2, $3)
            ON CONFLICT (email) DO UPDATE
            SET status = 'active', source = EXCLUDED.source, updated_at = NOW()
            WHERE newsletter_subscriptions.status <> 'active'
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(email)
        .bind(source)
        .bind(&metadata)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) if row.get::<bool, _>("inserted") => Ok(SubscribeOutcome::New {
                subscription_id: row.get("id"),
            }),
            Some(_) => Ok(SubscribeOutcome::Resubscribed),
            None => Ok(SubscribeOutcome::AlreadyActive),
        }
    }
}
