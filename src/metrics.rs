// Prometheus Metrics Collection
//
// Operational counters for the lead pipeline and reporting endpoints,
// exposed at /metrics.

use prometheus::{CounterVec, Histogram, HistogramOpts, IntCounterVec, Opts, Registry};

pub struct AppMetrics {
    pub registry: Registry,

    /// Lead submissions by outcome: created, rate_limited, invalid, db_error
    pub lead_submissions: IntCounterVec,
    /// Newsletter subscribe calls by outcome: new, resubscribed, already_active, invalid
    pub newsletter_requests: IntCounterVec,
    /// Post-persistence fan-out results by integration and outcome
    pub fanout_results: CounterVec,
    /// Latency of analytics snapshot fetches, seconds
    pub analytics_fetch_duration: Histogram,
}

impl AppMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let lead_submissions = IntCounterVec::new(
            Opts::new("lead_submissions_total", "Lead submissions by outcome"),
            &["outcome"],
        )
        .unwrap();

        let newsletter_requests = IntCounterVec::new(
            Opts::new(
                "newsletter_requests_total",
                "Newsletter subscribe calls by outcome",
            ),
            &["outcome"],
        )
        .unwrap();

        let fanout_results = CounterVec::new(
            Opts::new(
                "lead_fanout_results_total",
                "CRM sync and email results after lead persistence",
            ),
            &["integration", "result"],
        )
        .unwrap();

        let analytics_fetch_duration = Histogram::with_opts(
            HistogramOpts::new(
                "analytics_fetch_duration_seconds",
                "Latency of KPI snapshot fetches",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )
        .unwrap();

        registry.register(Box::new(lead_submissions.clone())).unwrap();
        registry.register(Box::new(newsletter_requests.clone())).unwrap();
        registry.register(Box::new(fanout_results.clone())).unwrap();
        registry
            .register(Box::new(analytics_fetch_duration.clone()))
            .unwrap();

        Self {
            registry,
            lead_submissions,
            newsletter_requests,
            fanout_results,
            analytics_fetch_duration,
        }
    }

    pub fn record_submission(&self, outcome: &str) {
        self.lead_submissions.with_label_values(&[outcome]).inc();
    }

    pub fn record_newsletter(&self, outcome: &str) {
        self.newsletter_requests.with_label_values(&[outcome]).inc();
    }

    pub fn record_fanout(&self, integration: &str, result: &str) {
        self.fanout_results
            .with_label_values(&[integration, result])
            .inc();
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}
