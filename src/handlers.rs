// HTTP Handlers
//
// Thin axum handlers over the pipeline, the database, and the
// analytics clients. Response envelopes and status codes mirror the
// public API contract; all failure paths go through ApiError.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveDate, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::analytics::{previous_period, GaClient, DATE_FORMAT};
use crate::database::{Database, SubscriptionStore};
use crate::email::LeadNotifier;
use crate::error::ApiError;
use crate::insights::{detect_anomalies, generate_insights};
use crate::metrics::AppMetrics;
use crate::models::{LeadStatus, LeadSubmission, SubscribeOutcome};
use crate::pipeline::LeadPipeline;
use crate::rate_limit::client_id;
use crate::validation::validate_newsletter_email;

const DEFAULT_WINDOW_DAYS: i64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<LeadPipeline>,
    pub database: Arc<Database>,
    pub notifier: Arc<dyn LeadNotifier>,
    pub analytics: Option<Arc<GaClient>>,
    pub metrics: Arc<AppMetrics>,
    pub analytics_api_key: Option<String>,
    pub started_at: Instant,
}

/// POST /api/leads
pub async fn submit_lead(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut submission): Json<LeadSubmission>,
) -> Result<Response, ApiError> {
    // The Referer header wins over whatever the form carried.
    if let Some(referer) = headers.get("referer").and_then(|v| v.to_str().ok()) {
        submission.referrer = Some(referer.to_string());
    }

    let client = client_id(&headers);
    let lead = state.pipeline.submit(&client, submission).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Lead submitted successfully",
            "leadId": lead.id,
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListLeadsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub status: Option<String>,
}

/// GET /api/leads
// TODO: add operator authentication before this ships beyond the
// internal network; the listing is currently open by design parity
// with the admin dashboard it feeds.
pub async fn list_leads(
    State(state): State<AppState>,
    Query(query): Query<ListLeadsQuery>,
) -> Result<Response, ApiError> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(
            LeadStatus::from_str(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown status filter: {raw}")))?,
        ),
    };

    let (leads, total) = state.database.list_leads(status, limit, offset).await?;

    Ok(Json(json!({
        "success": true,
        "data": leads,
        "pagination": {
            "total": total,
            "limit": limit,
            "offset": offset,
            "hasMore": offset + limit < total,
        },
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct NewsletterRequest {
    pub email: Option<String>,
    pub source: Option<String>,
}

/// POST /api/newsletter
pub async fn subscribe_newsletter(
    State(state): State<AppState>,
    Json(request): Json<NewsletterRequest>,
) -> Result<Response, ApiError> {
    let email = validate_newsletter_email(request.email.as_deref().unwrap_or_default())
        .map_err(|e| {
            state.metrics.record_newsletter("invalid");
            ApiError::Validation(vec![e])
        })?;
    let source = request.source.unwrap_or_else(|| "web".to_string());

    let outcome = state.database.subscribe_newsletter(&email, &source).await?;

    let (status, outcome_label, body) = subscription_response(&outcome);
    state.metrics.record_newsletter(outcome_label);

    // Welcome email goes out without blocking the response.
    let notifier = Arc::clone(&state.notifier);
    tokio::spawn(async move { send_welcome_if_new(notifier, &outcome, &email).await });

    Ok((status, Json(body)).into_response())
}

/// Map a subscribe outcome onto the response status, the metric label,
/// and the JSON body. Only a first-time subscription carries the new
/// subscription id.
fn subscription_response(
    outcome: &SubscribeOutcome,
) -> (StatusCode, &'static str, serde_json::Value) {
    match outcome {
        SubscribeOutcome::New { subscription_id } => (
            StatusCode::CREATED,
            "new",
            json!({
                "success": true,
                "message": "Successfully subscribed to newsletter",
                "subscriptionId": subscription_id,
            }),
        ),
        SubscribeOutcome::Resubscribed => (
            StatusCode::OK,
            "resubscribed",
            json!({
                "success": true,
                "message": "You have been resubscribed to our newsletter",
            }),
        ),
        SubscribeOutcome::AlreadyActive => (
            StatusCode::OK,
            "already_active",
            json!({
                "success": true,
                "message": "You are already subscribed to our newsletter",
            }),
        ),
    }
}

/// First-time subscribers get the welcome email; reactivations and
/// repeats do not.
pub(crate) async fn send_welcome_if_new(
    notifier: Arc<dyn LeadNotifier>,
    outcome: &SubscribeOutcome,
    email: &str,
) {
    if let SubscribeOutcome::New { .. } = outcome {
        notifier.send_newsletter_welcome(email).await;
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub compare_with_previous: Option<bool>,
}

fn check_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if let Some(expected) = state.analytics_api_key.as_deref() {
        let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(())
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|_| ApiError::BadRequest("Invalid date format. Use YYYY-MM-DD".to_string()))
}

/// Resolve the requested range, defaulting to the trailing 30 days.
fn resolve_range(query: &AnalyticsQuery) -> Result<(NaiveDate, NaiveDate), ApiError> {
    let today = Utc::now().date_naive();
    let end_date = match query.end_date.as_deref() {
        Some(raw) => parse_date(raw)?,
        None => today,
    };
    let start_date = match query.start_date.as_deref() {
        Some(raw) => parse_date(raw)?,
        None => end_date - chrono::Duration::days(DEFAULT_WINDOW_DAYS),
    };
    if start_date > end_date {
        return Err(ApiError::BadRequest(
            "startDate must not be after endDate".to_string(),
        ));
    }
    Ok((start_date, end_date))
}

fn analytics_client(state: &AppState) -> Result<&Arc<GaClient>, ApiError> {
    state
        .analytics
        .as_ref()
        .ok_or(ApiError::NotConfigured("Google Analytics"))
}

/// GET /api/analytics/kpis
pub async fn get_kpis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Response, ApiError> {
    check_api_key(&state, &headers)?;
    let (start_date, end_date) = resolve_range(&query)?;
    let client = analytics_client(&state)?;

    let timer = state.metrics.analytics_fetch_duration.start_timer();
    let kpis = client.fetch_kpis(start_date, end_date).await?;
    timer.observe_duration();

    Ok(Json(json!({ "success": true, "data": kpis })).into_response())
}

/// GET /api/analytics/insights
pub async fn get_insights(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Response, ApiError> {
    check_api_key(&state, &headers)?;
    let (start_date, end_date) = resolve_range(&query)?;
    let client = analytics_client(&state)?;
    let compare_with_previous = query.compare_with_previous.unwrap_or(true);

    let timer = state.metrics.analytics_fetch_duration.start_timer();
    let current = client.fetch_kpis(start_date, end_date).await?;
    timer.observe_duration();

    let mut previous = None;
    let mut insights = Vec::new();
    let mut anomalies = Vec::new();

    if compare_with_previous {
        let (previous_start, previous_end) = previous_period(start_date, end_date);
        match client.fetch_kpis(previous_start, previous_end).await {
            Ok(previous_kpis) => {
                insights = generate_insights(&current, &previous_kpis);
                // The preceding window doubles as the anomaly baseline.
                anomalies = detect_anomalies(&current, &previous_kpis);
                previous = Some(previous_kpis);
            }
            Err(e) => {
                warn!("could not fetch previous period metrics: {}", e);
            }
        }
    }

    Ok(Json(json!({
        "success": true,
        "data": {
            "currentPeriod": current,
            "previousPeriod": previous,
            "insights": insights,
            "anomalies": anomalies,
            "generatedAt": Utc::now().to_rfc3339(),
        },
    }))
    .into_response())
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    let started = Instant::now();

    let db_started = Instant::now();
    let database_check = match state.database.ping().await {
        Ok(()) => json!({
            "status": "healthy",
            "responseTime": db_started.elapsed().as_millis() as u64,
        }),
        Err(e) => json!({
            "status": "unhealthy",
            "error": e.to_string(),
        }),
    };

    let healthy = database_check["status"] == "healthy";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "timestamp": Utc::now().to_rfc3339(),
            "uptime": state.started_at.elapsed().as_secs(),
            "version": env!("CARGO_PKG_VERSION"),
            "checks": { "database": database_check },
            "responseTime": started.elapsed().as_millis() as u64,
        })),
    )
        .into_response()
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Result<Response, StatusCode> {
    let encoder = TextEncoder::new();
    let families = state.metrics.registry.gather();
    let output = encoder
        .encode_to_string(&families)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Response::builder()
        .header("content-type", encoder.format_type())
        .body(output.into())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    use crate::models::Lead;

    /// In-memory stand-in with the same contract as the real store:
    /// one row per email, reactivate-or-report on repeat calls.
    #[derive(Default)]
    struct FakeSubscriptions {
        rows: Mutex<HashMap<String, (Uuid, &'static str)>>,
    }

    #[async_trait]
    impl SubscriptionStore for FakeSubscriptions {
        async fn subscribe_newsletter(
            &self,
            email: &str,
            _source: &str,
        ) -> Result<SubscribeOutcome, sqlx::Error> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(email) {
                None => {
                    let id = Uuid::new_v4();
                    rows.insert(email.to_string(), (id, "active"));
                    Ok(SubscribeOutcome::New {
                        subscription_id: id,
                    })
                }
                Some((_, status)) if *status == "active" => Ok(SubscribeOutcome::AlreadyActive),
                Some((_, status)) => {
                    *status = "active";
                    Ok(SubscribeOutcome::Resubscribed)
                }
            }
        }
    }

    #[derive(Default)]
    struct WelcomeCounter {
        welcomes: AtomicUsize,
    }

    #[async_trait]
    impl LeadNotifier for WelcomeCounter {
        async fn notify_new_lead(&self, _lead: &Lead) {}

        async fn send_newsletter_welcome(&self, _email: &str) {
            self.welcomes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn repeat_subscribes_never_duplicate_a_row() {
        let store = FakeSubscriptions::default();

        let first = store.subscribe_newsletter("buyer@example.com", "web").await.unwrap();
        assert!(matches!(first, SubscribeOutcome::New { .. }));

        let second = store.subscribe_newsletter("buyer@example.com", "web").await.unwrap();
        assert_eq!(second, SubscribeOutcome::AlreadyActive);

        store
            .rows
            .lock()
            .unwrap()
            .get_mut("buyer@example.com")
            .unwrap()
            .1 = "unsubscribed";
        let third = store.subscribe_newsletter("buyer@example.com", "web").await.unwrap();
        assert_eq!(third, SubscribeOutcome::Resubscribed);

        assert_eq!(store.rows.lock().unwrap().len(), 1);
    }

    #[test]
    fn subscription_outcomes_map_onto_distinct_responses() {
        let id = Uuid::new_v4();
        let (status, label, body) = subscription_response(&SubscribeOutcome::New {
            subscription_id: id,
        });
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(label, "new");
        assert_eq!(body["subscriptionId"], json!(id));

        let (status, label, body) = subscription_response(&SubscribeOutcome::Resubscribed);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(label, "resubscribed");
        assert!(body.get("subscriptionId").is_none());

        let (status, label, _) = subscription_response(&SubscribeOutcome::AlreadyActive);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(label, "already_active");
    }

    #[tokio::test]
    async fn welcome_email_goes_only_to_first_time_subscribers() {
        let notifier = Arc::new(WelcomeCounter::default());
        let email = "buyer@example.com";

        let new = SubscribeOutcome::New {
            subscription_id: Uuid::new_v4(),
        };
        send_welcome_if_new(notifier.clone(), &new, email).await;
        send_welcome_if_new(notifier.clone(), &SubscribeOutcome::Resubscribed, email).await;
        send_welcome_if_new(notifier.clone(), &SubscribeOutcome::AlreadyActive, email).await;

        assert_eq!(notifier.welcomes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_range_is_trailing_thirty_days() {
        let query = AnalyticsQuery {
            start_date: None,
            end_date: None,
            compare_with_previous: None,
        };
        let (start, end) = resolve_range(&query).unwrap();
        assert_eq!((end - start).num_days(), DEFAULT_WINDOW_DAYS);
    }

    #[test]
    fn malformed_dates_are_rejected() {
        let query = AnalyticsQuery {
            start_date: Some("01/02/2024".into()),
            end_date: None,
            compare_with_previous: None,
        };
        assert!(matches!(
            resolve_range(&query),
            Err(ApiError::BadRequest(_))
        ));

        let inverted = AnalyticsQuery {
            start_date: Some("2024-03-01".into()),
            end_date: Some("2024-02-01".into()),
            compare_with_previous: None,
        };
        assert!(resolve_range(&inverted).is_err());
    }
}
