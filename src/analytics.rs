// Analytics Fetcher (GA4 Data API)
//
// Pulls three reports for a date range (traffic by date/device/source,
// named custom events, top pages by views) and folds them into one
// immutable KPI snapshot. Missing credentials are a configuration
// error, surfaced distinctly from a failed query.

use std::collections::HashMap;

use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::ApiError;
use crate::models::{DeviceBreakdown, KpiMetrics, TopPage, TopReferrer};

const TOP_RESULTS: usize = 10;

/// Date format accepted by the reporting endpoints.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportValue {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    #[serde(default)]
    pub dimension_values: Vec<ReportValue>,
    #[serde(default)]
    pub metric_values: Vec<ReportValue>,
}

impl ReportRow {
    fn dimension(&self, index: usize) -> &str {
        self.dimension_values
            .get(index)
            .map(|v| v.value.as_str())
            .unwrap_or_default()
    }

    fn metric_i64(&self, index: usize) -> i64 {
        self.metric_values
            .get(index)
            .and_then(|v| v.value.parse().ok())
            .unwrap_or(0)
    }

    fn metric_f64(&self, index: usize) -> f64 {
        self.metric_values
            .get(index)
            .and_then(|v| v.value.parse().ok())
            .unwrap_or(0.0)
    }
}

/// Subset of the GA4 runReport response we consume.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReportResponse {
    #[serde(default)]
    pub rows: Vec<ReportRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DateRange {
    start_date: String,
    end_date: String,
}

/// GA4 Data API client. Construction requires both the property id and
/// an access token; absence of either is reported as NotConfigured by
/// the caller holding the Option.
pub struct GaClient {
    http: Client,
    property_id: String,
    access_token: String,
}

impl GaClient {
    pub fn from_config(
        http: Client,
        property_id: Option<String>,
        access_token: Option<String>,
    ) -> Option<Self> {
        match (property_id, access_token) {
            (Some(property_id), Some(access_token)) => Some(Self {
                http,
                property_id,
                access_token,
            }),
            _ => None,
        }
    }

    fn report_url(&self) -> String {
        format!(
            "https://analyticsdata.googleapis.com/v1beta/properties/{}:runReport",
            self.property_id
        )
    }

    async fn run_report(&self, body: serde_json::Value) -> Result<RunReportResponse, ApiError> {
        let response = self
            .http
            .post(self.report_url())
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "analytics query failed ({status}): {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))
    }

    /// Fetch the KPI snapshot for a closed date range.
    pub async fn fetch_kpis(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<KpiMetrics, ApiError> {
        let range = DateRange {
            start_date: start_date.format(DATE_FORMAT).to_string(),
            end_date: end_date.format(DATE_FORMAT).to_string(),
        };

        let traffic = self
            .run_report(json!({
                "dateRanges": [&range],
                "dimensions": [
                    { "name": "date" },
                    { "name": "deviceCategory" },
                    { "name": "sessionSource" },
                ],
                "metrics": [
                    { "name": "totalUsers" },
                    { "name": "newUsers" },
                    { "name": "sessions" },
                    { "name": "screenPageViews" },
                    { "name": "averageSessionDuration" },
                    { "name": "bounceRate" },
                ],
            }))
            .await?;

        let events = self
            .run_report(json!({
                "dateRanges": [&range],
                "dimensions": [{ "name": "eventName" }],
                "metrics": [{ "name": "eventCount" }],
            }))
            .await?;

        let pages = self
            .run_report(json!({
                "dateRanges": [&range],
                "dimensions": [{ "name": "pagePath" }],
                "metrics": [{ "name": "screenPageViews" }],
                "orderBys": [{ "metric": { "metricName": "screenPageViews" }, "desc": true }],
                "limit": TOP_RESULTS,
            }))
            .await?;

        debug!(
            "fetched analytics reports for {}..{}: {} traffic rows, {} event rows",
            range.start_date,
            range.end_date,
            traffic.rows.len(),
            events.rows.len(),
        );

        Ok(aggregate_reports(&traffic, &events, &pages, start_date, end_date))
    }
}

/// Fold the three raw reports into a KPI snapshot. Pure so the whole
/// normalization path is testable without credentials.
pub fn aggregate_reports(
    traffic: &RunReportResponse,
    events: &RunReportResponse,
    pages: &RunReportResponse,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> KpiMetrics {
    let mut total_users = 0i64;
    let mut new_users = 0i64;
    let mut sessions = 0i64;
    let mut page_views = 0i64;
    let mut weighted_duration = 0.0f64;
    let mut weighted_bounce = 0.0f64;
    let mut device_breakdown = DeviceBreakdown::default();
    let mut referrers: HashMap<String, i64> = HashMap::new();

    for row in &traffic.rows {
        let users = row.metric_i64(0);
        let new_user_count = row.metric_i64(1);
        let session_count = row.metric_i64(2);
        let views = row.metric_i64(3);
        let duration = row.metric_f64(4);
        let bounce = row.metric_f64(5);

        total_users += users;
        new_users += new_user_count;
        sessions += session_count;
        page_views += views;
        // Session-weighted so rows with more traffic dominate the average.
        weighted_duration += duration * session_count as f64;
        weighted_bounce += bounce * session_count as f64;

        // Unrecognized device labels stay out of the breakdown but are
        // still part of the overall session count.
        match row.dimension(1) {
            "desktop" => device_breakdown.desktop += session_count,
            "mobile" => device_breakdown.mobile += session_count,
            "tablet" => device_breakdown.tablet += session_count,
            _ => {}
        }

        let source = match row.dimension(2) {
            "" => "direct".to_string(),
            source => source.to_string(),
        };
        *referrers.entry(source).or_insert(0) += session_count;
    }

    let mut event_counts: HashMap<&str, i64> = HashMap::new();
    for row in &events.rows {
        event_counts.insert(row.dimension(0), row.metric_i64(0));
    }
    let event = |name: &str| event_counts.get(name).copied().unwrap_or(0);

    let top_pages: Vec<TopPage> = pages
        .rows
        .iter()
        .take(TOP_RESULTS)
        .map(|row| TopPage {
            path: row.dimension(0).to_string(),
            views: row.metric_i64(0),
        })
        .collect();

    let mut top_referrers: Vec<TopReferrer> = referrers
        .into_iter()
        .map(|(source, sessions)| TopReferrer { source, sessions })
        .collect();
    top_referrers.sort_by(|a, b| b.sessions.cmp(&a.sessions).then(a.source.cmp(&b.source)));
    top_referrers.truncate(TOP_RESULTS);

    let form_submissions = event("form_submit");
    let form_starts = event("form_step");

    let average_session_duration = if sessions > 0 {
        weighted_duration / sessions as f64
    } else {
        0.0
    };
    let bounce_rate = if sessions > 0 {
        weighted_bounce / sessions as f64 * 100.0
    } else {
        0.0
    };
    let lead_conversion_rate = if sessions > 0 {
        form_submissions as f64 / sessions as f64 * 100.0
    } else {
        0.0
    };
    let form_completion_rate = if form_starts > 0 {
        form_submissions as f64 / form_starts as f64 * 100.0
    } else {
        0.0
    };

    KpiMetrics {
        total_users,
        new_users,
        returning_users: total_users - new_users,
        sessions,
        page_views,
        average_session_duration,
        bounce_rate,
        form_submissions,
        newsletter_subscriptions: event("newsletter_subscribe"),
        product_views: event("product_view"),
        downloads: event("file_download"),
        whatsapp_clicks: event("whatsapp_click"),
        phone_clicks: event("phone_click"),
        email_clicks: event("email_click"),
        lead_conversion_rate,
        form_completion_rate,
        top_pages,
        top_referrers,
        device_breakdown,
        start_date,
        end_date,
    }
}

/// Compute the immediately preceding window of equal length.
pub fn previous_period(start_date: NaiveDate, end_date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let span = (end_date - start_date).num_days().max(0);
    let previous_end = start_date - chrono::Duration::days(1);
    let previous_start = previous_end - chrono::Duration::days(span);
    (previous_start, previous_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(dimensions: &[&str], metrics: &[&str]) -> ReportRow {
        ReportRow {
            dimension_values: dimensions
                .iter()
                .map(|v| ReportValue { value: v.to_string() })
                .collect(),
            metric_values: metrics
                .iter()
                .map(|v| ReportValue { value: v.to_string() })
                .collect(),
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn traffic_fixture() -> RunReportResponse {
        RunReportResponse {
            rows: vec![
                // date, device, source / users, new, sessions, views, duration, bounce
                row(
                    &["20240101", "desktop", "google"],
                    &["100", "60", "120", "300", "90.0", "0.40"],
                ),
                row(
                    &["20240101", "mobile", "direct"],
                    &["50", "30", "60", "100", "45.0", "0.60"],
                ),
                row(
                    &["20240102", "smarttv", "google"],
                    &["10", "5", "20", "30", "30.0", "0.50"],
                ),
            ],
        }
    }

    fn events_fixture() -> RunReportResponse {
        RunReportResponse {
            rows: vec![
                row(&["form_submit"], &["10"]),
                row(&["form_step"], &["40"]),
                row(&["newsletter_subscribe"], &["7"]),
                row(&["whatsapp_click"], &["3"]),
            ],
        }
    }

    fn pages_fixture() -> RunReportResponse {
        RunReportResponse {
            rows: vec![
                row(&["/products"], &["200"]),
                row(&["/"], &["150"]),
            ],
        }
    }

    #[test]
    fn sums_counts_and_weights_averages_by_sessions() {
        let kpis = aggregate_reports(
            &traffic_fixture(),
            &events_fixture(),
            &pages_fixture(),
            date("2024-01-01"),
            date("2024-01-02"),
        );

        assert_eq!(kpis.total_users, 160);
        assert_eq!(kpis.new_users, 95);
        assert_eq!(kpis.returning_users, 65);
        assert_eq!(kpis.sessions, 200);
        assert_eq!(kpis.page_views, 430);

        // (90*120 + 45*60 + 30*20) / 200
        assert!((kpis.average_session_duration - 70.5).abs() < 1e-9);
        // (0.40*120 + 0.60*60 + 0.50*20) / 200 * 100
        assert!((kpis.bounce_rate - 47.0).abs() < 1e-9);
    }

    #[test]
    fn unrecognized_devices_are_dropped_from_breakdown_only() {
        let kpis = aggregate_reports(
            &traffic_fixture(),
            &events_fixture(),
            &pages_fixture(),
            date("2024-01-01"),
            date("2024-01-02"),
        );

        assert_eq!(kpis.device_breakdown.desktop, 120);
        assert_eq!(kpis.device_breakdown.mobile, 60);
        assert_eq!(kpis.device_breakdown.tablet, 0);
        // smarttv sessions still count toward the total.
        assert_eq!(kpis.sessions, 200);
    }

    #[test]
    fn derives_rates_with_zero_guards() {
        let kpis = aggregate_reports(
            &traffic_fixture(),
            &events_fixture(),
            &pages_fixture(),
            date("2024-01-01"),
            date("2024-01-02"),
        );
        assert!((kpis.lead_conversion_rate - 5.0).abs() < 1e-9);
        assert!((kpis.form_completion_rate - 25.0).abs() < 1e-9);

        let empty = aggregate_reports(
            &RunReportResponse::default(),
            &RunReportResponse::default(),
            &RunReportResponse::default(),
            date("2024-01-01"),
            date("2024-01-02"),
        );
        assert_eq!(empty.sessions, 0);
        assert_eq!(empty.bounce_rate, 0.0);
        assert_eq!(empty.lead_conversion_rate, 0.0);
        assert_eq!(empty.form_completion_rate, 0.0);
        assert_eq!(empty.average_session_duration, 0.0);
    }

    #[test]
    fn referrers_are_ranked_by_sessions() {
        let kpis = aggregate_reports(
            &traffic_fixture(),
            &events_fixture(),
            &pages_fixture(),
            date("2024-01-01"),
            date("2024-01-02"),
        );
        assert_eq!(kpis.top_referrers[0].source, "google");
        assert_eq!(kpis.top_referrers[0].sessions, 140);
        assert_eq!(kpis.top_referrers[1].source, "direct");
    }

    #[test]
    fn event_counts_map_onto_named_kpis() {
        let kpis = aggregate_reports(
            &traffic_fixture(),
            &events_fixture(),
            &pages_fixture(),
            date("2024-01-01"),
            date("2024-01-02"),
        );
        assert_eq!(kpis.form_submissions, 10);
        assert_eq!(kpis.newsletter_subscriptions, 7);
        assert_eq!(kpis.whatsapp_clicks, 3);
        assert_eq!(kpis.downloads, 0);
        assert_eq!(kpis.top_pages[0].path, "/products");
    }

    #[test]
    fn previous_period_is_adjacent_and_equal_length() {
        let (prev_start, prev_end) = previous_period(date("2024-02-01"), date("2024-02-29"));
        assert_eq!(prev_end, date("2024-01-31"));
        assert_eq!(prev_start, date("2024-01-03"));
        assert_eq!(prev_end - prev_start, date("2024-02-29") - date("2024-02-01"));

        let (single_start, single_end) = previous_period(date("2024-02-10"), date("2024-02-10"));
        assert_eq!(single_start, date("2024-02-09"));
        assert_eq!(single_end, date("2024-02-09"));
    }
}
