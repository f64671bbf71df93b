// Fixed-Window Rate Limiting
//
// Gate in front of lead ingestion. Counters live behind the
// RateLimitStore trait so the process-local map used in single-instance
// deployments and a Redis-backed store for multi-instance deployments
// are interchangeable without touching the pipeline contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Entries above this count trigger an opportunistic sweep of expired
/// records after the current request's accounting is done.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
}

/// Per-client counter for the current window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Outcome of a rate-limit check, echoed back to rejected callers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Storage abstraction for rate-limit counters.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<RateLimitRecord>;
    async fn set(&self, key: &str, record: RateLimitRecord, ttl: Duration);
    /// Drop entries whose window has expired. Best-effort.
    async fn sweep(&self, now: DateTime<Utc>);
    async fn len(&self) -> usize;
}

/// Process-local store. Sufficient for single-instance deployment; the
/// mutex makes the read-check-increment sequence atomic per key.
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn get(&self, key: &str) -> Option<RateLimitRecord> {
        self.records.lock().await.get(key).copied()
    }

    async fn set(&self, key: &str, record: RateLimitRecord, _ttl: Duration) {
        self.records.lock().await.insert(key.to_string(), record);
    }

    async fn sweep(&self, now: DateTime<Utc>) {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| now <= record.reset_at);
        debug!("rate-limit sweep dropped {} expired entries", before - records.len());
    }

    async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

/// Redis-backed store for multi-instance deployments. Records expire
/// server-side, so sweep is a no-op. Updates are last-write-wins across
/// instances, which can undercount near the window boundary.
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
}

impl RedisRateLimitStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn key(key: &str) -> String {
        format!("ratelimit:{key}")
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn get(&self, key: &str) -> Option<RateLimitRecord> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(Self::key(key)).await {
            Ok(Some(json)) => serde_json::from_str(&json).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("redis GET failed for rate-limit key {}: {}", key, e);
                None
            }
        }
    }

    async fn set(&self, key: &str, record: RateLimitRecord, ttl: Duration) {
        let mut conn = self.conn.clone();
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize rate-limit record: {}", e);
                return;
            }
        };
        let ttl_ms = ttl.as_millis().max(1) as u64;
        if let Err(e) = conn
            .set_options::<_, _, ()>(
                Self::key(key),
                json,
                redis::SetOptions::default()
                    .with_expiration(redis::SetExpiry::PX(ttl_ms)),
            )
            .await
        {
            warn!("redis SET failed for rate-limit key {}: {}", key, e);
        }
    }

    async fn sweep(&self, _now: DateTime<Utc>) {}

    async fn len(&self) -> usize {
        0
    }
}

/// Fixed-window limiter over a pluggable store.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Check and count one request from `client_id`.
    pub async fn check(&self, client_id: &str) -> RateLimitDecision {
        self.check_at(client_id, Utc::now()).await
    }

    async fn check_at(&self, client_id: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let window = chrono::Duration::milliseconds(self.config.window_ms as i64);

        let mut record = match self.store.get(client_id).await {
            Some(record) if now <= record.reset_at => record,
            _ => RateLimitRecord {
                count: 0,
                reset_at: now + window,
            },
        };

        record.count += 1;
        let ttl = (record.reset_at - now)
            .to_std()
            .unwrap_or_else(|_| Duration::from_millis(self.config.window_ms));
        self.store.set(client_id, record, ttl).await;

        let decision = RateLimitDecision {
            allowed: record.count <= self.config.max_requests,
            remaining: self.config.max_requests.saturating_sub(record.count),
            reset_at: record.reset_at,
        };

        if self.store.len().await > SWEEP_THRESHOLD {
            let store = Arc::clone(&self.store);
            tokio::spawn(async move { store.sweep(Utc::now()).await });
        }

        decision
    }
}

/// Derive the client identity from the forwarded-IP header chain. All
/// clients without one share the "unknown" bucket.
pub fn client_id(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
