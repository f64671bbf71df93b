// Lead Ingestion Pipeline
//
// Orchestrates a submission end to end: rate limit -> validate ->
// persist -> fan out. Persistence is the point of no return; the
// caller gets the lead id as soon as the row exists. CRM sync and
// notifications run on a detached task with independent error
// boundaries, so a slow or broken integration can never fail or delay
// a captured lead.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::crm::CrmSync;
use crate::database::LeadStore;
use crate::email::LeadNotifier;
use crate::error::ApiError;
use crate::metrics::AppMetrics;
use crate::models::{Lead, LeadSubmission};
use crate::rate_limit::RateLimiter;
use crate::validation::validate_lead;

pub struct LeadPipeline {
    limiter: RateLimiter,
    store: Arc<dyn LeadStore>,
    crm: Arc<dyn CrmSync>,
    notifier: Arc<dyn LeadNotifier>,
    metrics: Arc<AppMetrics>,
}

impl LeadPipeline {
    pub fn new(
        limiter: RateLimiter,
        store: Arc<dyn LeadStore>,
        crm: Arc<dyn CrmSync>,
        notifier: Arc<dyn LeadNotifier>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            limiter,
            store,
            crm,
            notifier,
            metrics,
        }
    }

    /// Run one submission through the pipeline. Returns the persisted
    /// lead; everything after persistence happens off the request path.
    pub async fn submit(
        &self,
        client_id: &str,
        submission: LeadSubmission,
    ) -> Result<Lead, ApiError> {
        let decision = self.limiter.check(client_id).await;
        if !decision.allowed {
            self.metrics.record_submission("rate_limited");
            warn!("rate limit exceeded for client {}", client_id);
            return Err(ApiError::RateLimited {
                remaining: decision.remaining,
                reset_at: decision.reset_at,
            });
        }

        let validated = validate_lead(&submission).map_err(|errors| {
            self.metrics.record_submission("invalid");
            ApiError::Validation(errors)
        })?;

        let lead = self.store.create_lead(&validated).await.map_err(|e| {
            self.metrics.record_submission("db_error");
            ApiError::Database(e)
        })?;

        self.metrics.record_submission("created");
        info!("lead {} captured from {}", lead.id, lead.source);

        self.spawn_follow_up(lead.clone());
        Ok(lead)
    }

    /// Detach the post-persistence fan-out. The request path holds no
    /// handle to the task and cannot observe or block on its outcome.
    fn spawn_follow_up(&self, lead: Lead) {
        let store = Arc::clone(&self.store);
        let crm = Arc::clone(&self.crm);
        let notifier = Arc::clone(&self.notifier);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(follow_up(store, crm, notifier, metrics, lead));
    }
}

/// CRM sync and notifications, each on its own error boundary. One
/// branch failing or stalling never stops the other.
pub(crate) async fn follow_up(
    store: Arc<dyn LeadStore>,
    crm: Arc<dyn CrmSync>,
    notifier: Arc<dyn LeadNotifier>,
    metrics: Arc<AppMetrics>,
    lead: Lead,
) {
    let crm_branch = sync_to_crm(store, crm, &metrics, &lead);
    let notify_branch = async {
        notifier.notify_new_lead(&lead).await;
        metrics.record_fanout("email", "attempted");
    };
    tokio::join!(crm_branch, notify_branch);
}

async fn sync_to_crm(
    store: Arc<dyn LeadStore>,
    crm: Arc<dyn CrmSync>,
    metrics: &AppMetrics,
    lead: &Lead,
) {
    match crm.sync_lead(lead).await {
        Some(crm_id) => {
            metrics.record_fanout("crm", "success");
            store.update_lead_crm_id(lead.id, &crm_id).await;
        }
        None => {
            metrics.record_fanout("crm", "no_change");
            warn!("CRM sync made no change for lead {}", lead.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::models::ValidatedLead;
    use crate::rate_limit::{InMemoryRateLimitStore, RateLimitConfig};

    #[derive(Default)]
    struct FakeStore {
        created: AtomicUsize,
        crm_ids: Mutex<Vec<(Uuid, String)>>,
    }

    #[async_trait]
    impl LeadStore for FakeStore {
        async fn create_lead(&self, lead: &ValidatedLead) -> Result<Lead, sqlx::Error> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Lead {
                id: Uuid::new_v4(),
                email: lead.email.clone(),
                name: lead.name.clone(),
                phone: lead.phone.clone(),
                company: lead.company.clone(),
                message: lead.message.clone(),
                source: lead.source.clone(),
                referrer: lead.referrer.clone(),
                metadata: serde_json::to_value(&lead.metadata).unwrap(),
                status: "new".into(),
                crm_id: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
        }

        async fn update_lead_crm_id(&self, lead_id: Uuid, crm_id: &str) {
            self.crm_ids.lock().unwrap().push((lead_id, crm_id.to_string()));
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl LeadStore for BrokenStore {
        async fn create_lead(&self, _lead: &ValidatedLead) -> Result<Lead, sqlx::Error> {
            Err(sqlx::Error::PoolClosed)
        }

        async fn update_lead_crm_id(&self, _lead_id: Uuid, _crm_id: &str) {}
    }

    struct StubCrm {
        result: Option<String>,
        attempts: AtomicUsize,
    }

    impl StubCrm {
        fn failing() -> Self {
            Self {
                result: None,
                attempts: AtomicUsize::new(0),
            }
        }

        fn succeeding(id: &str) -> Self {
            Self {
                result: Some(id.to_string()),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CrmSync for StubCrm {
        async fn sync_lead(&self, _lead: &Lead) -> Option<String> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        lead_notifications: AtomicUsize,
        welcomes: AtomicUsize,
    }

    #[async_trait]
    impl LeadNotifier for CountingNotifier {
        async fn notify_new_lead(&self, _lead: &Lead) {
            self.lead_notifications.fetch_add(1, Ordering::SeqCst);
        }

        async fn send_newsletter_welcome(&self, _email: &str) {
            self.welcomes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(
            Arc::new(InMemoryRateLimitStore::new()),
            RateLimitConfig {
                window_ms: 60_000,
                max_requests,
            },
        )
    }

    fn valid_submission() -> LeadSubmission {
        LeadSubmission {
            name: Some("John Doe".into()),
            email: Some("john@example.com".into()),
            product_categories: Some(vec!["terry".into()]),
            message: Some("This is a test message with enough characters".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn valid_submission_returns_a_lead_id() {
        let store = Arc::new(FakeStore::default());
        let pipeline = LeadPipeline::new(
            limiter(5),
            store.clone(),
            Arc::new(StubCrm::succeeding("hs-1")),
            Arc::new(CountingNotifier::default()),
            Arc::new(AppMetrics::new()),
        );

        let lead = pipeline.submit("1.2.3.4", valid_submission()).await.unwrap();
        assert!(!lead.id.is_nil());
        assert_eq!(store.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limited_submission_persists_nothing() {
        let store = Arc::new(FakeStore::default());
        let pipeline = LeadPipeline::new(
            limiter(1),
            store.clone(),
            Arc::new(StubCrm::failing()),
            Arc::new(CountingNotifier::default()),
            Arc::new(AppMetrics::new()),
        );

        pipeline.submit("1.2.3.4", valid_submission()).await.unwrap();
        let err = pipeline.submit("1.2.3.4", valid_submission()).await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimited { remaining: 0, .. }));
        assert_eq!(store.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_submission_persists_nothing_and_lists_all_faults() {
        let store = Arc::new(FakeStore::default());
        let pipeline = LeadPipeline::new(
            limiter(5),
            store.clone(),
            Arc::new(StubCrm::failing()),
            Arc::new(CountingNotifier::default()),
            Arc::new(AppMetrics::new()),
        );

        let submission = LeadSubmission {
            message: Some("short".into()),
            product_categories: Some(vec!["terry".into()]),
            ..Default::default()
        };
        let err = pipeline.submit("1.2.3.4", submission).await.unwrap_err();
        match err {
            ApiError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(store.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_failure_is_fatal_to_the_request() {
        let pipeline = LeadPipeline::new(
            limiter(5),
            Arc::new(BrokenStore),
            Arc::new(StubCrm::failing()),
            Arc::new(CountingNotifier::default()),
            Arc::new(AppMetrics::new()),
        );
        let err = pipeline.submit("1.2.3.4", valid_submission()).await.unwrap_err();
        assert!(matches!(err, ApiError::Database(_)));
    }

    #[tokio::test]
    async fn failing_crm_never_blocks_capture_or_notifications() {
        let store = Arc::new(FakeStore::default());
        let crm = Arc::new(StubCrm::failing());
        let notifier = Arc::new(CountingNotifier::default());
        let metrics = Arc::new(AppMetrics::new());

        let pipeline = LeadPipeline::new(
            limiter(5),
            store.clone(),
            crm.clone(),
            notifier.clone(),
            metrics.clone(),
        );
        let lead = pipeline.submit("1.2.3.4", valid_submission()).await.unwrap();

        // Drive the fan-out deterministically instead of racing the
        // spawned task.
        follow_up(store.clone(), crm.clone(), notifier.clone(), metrics, lead).await;

        assert!(crm.attempts.load(Ordering::SeqCst) >= 1);
        assert!(notifier.lead_notifications.load(Ordering::SeqCst) >= 1);
        assert!(store.crm_ids.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_crm_sync_records_the_external_id() {
        let store = Arc::new(FakeStore::default());
        let crm = Arc::new(StubCrm::succeeding("hs-42"));
        let notifier = Arc::new(CountingNotifier::default());
        let metrics = Arc::new(AppMetrics::new());

        let lead = store.create_lead(&validate_lead(&valid_submission()).unwrap()).await.unwrap();
        follow_up(store.clone(), crm, notifier, metrics, lead.clone()).await;

        let recorded = store.crm_ids.lock().unwrap();
        assert_eq!(recorded.as_slice(), &[(lead.id, "hs-42".to_string())]);
    }
}
