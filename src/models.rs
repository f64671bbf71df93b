// Data Models and Types
//
// This module defines the data structures shared across the service:
// leads and newsletter subscriptions (persisted), KPI snapshots and
// insights (derived from the analytics provider).

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a lead. Leads always start as `New`; later
/// transitions are driven by admin tooling outside this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Converted,
    Archived,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Converted => "converted",
            LeadStatus::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(LeadStatus::New),
            "contacted" => Some(LeadStatus::Contacted),
            "qualified" => Some(LeadStatus::Qualified),
            "converted" => Some(LeadStatus::Converted),
            "archived" => Some(LeadStatus::Archived),
            _ => None,
        }
    }
}

/// Structured metadata captured by the multi-step RFQ form.
///
/// Every known key is a typed optional field; anything the form sends
/// that we do not recognize lands in `extra` so it still round-trips
/// through the JSONB column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_categories: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weave_preference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_requirements: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certification_requirements: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logistics_timeline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facility_preference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_market: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_contact_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hear_about_us: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A persisted lead. `crm_id` is set asynchronously once the CRM sync
/// succeeds and is never cleared afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub message: String,
    pub source: String,
    pub referrer: Option<String>,
    pub metadata: serde_json::Value,
    pub status: String,
    pub crm_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Deserialize the JSONB metadata column back into its typed form.
    pub fn metadata(&self) -> LeadMetadata {
        serde_json::from_value(self.metadata.clone()).unwrap_or_default()
    }
}

/// Raw RFQ form submission as assembled client-side. Validated as one
/// unit by `validation::validate_lead` before anything is persisted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSubmission {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub product_categories: Option<Vec<String>>,
    pub volume: Option<String>,
    pub weave_preference: Option<String>,
    pub custom_requirements: Option<String>,
    pub certification_requirements: Option<Vec<String>>,
    pub logistics_timeline: Option<String>,
    pub facility_preference: Option<String>,
    pub target_market: Option<String>,
    pub message: Option<String>,
    pub preferred_contact_method: Option<String>,
    pub hear_about_us: Option<String>,
    pub source: Option<String>,
    pub referrer: Option<String>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

/// Submission that passed all four validation fragments. Construction
/// outside `validation` is not possible; the fields are what
/// `Database::create_lead` persists.
#[derive(Debug, Clone)]
pub struct ValidatedLead {
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub message: String,
    pub source: String,
    pub referrer: Option<String>,
    pub metadata: LeadMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Unsubscribed,
}

/// Newsletter subscription row; at most one per email address.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NewsletterSubscription {
    pub id: Uuid,
    pub email: String,
    pub status: String,
    pub source: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a subscribe call, used to pick the response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// First time we have seen this email.
    New { subscription_id: Uuid },
    /// Previously unsubscribed, now reactivated.
    Resubscribed,
    /// Already active; nothing changed.
    AlreadyActive,
}

/// Sessions bucketed by device category. Unrecognized device labels are
/// dropped from the breakdown but still counted in overall sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceBreakdown {
    pub desktop: i64,
    pub mobile: i64,
    pub tablet: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPage {
    pub path: String,
    pub views: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopReferrer {
    pub source: String,
    pub sessions: i64,
}

/// Immutable KPI snapshot for a closed date range, aggregated from the
/// analytics provider's traffic, event, and page reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiMetrics {
    // Traffic
    pub total_users: i64,
    pub new_users: i64,
    pub returning_users: i64,
    pub sessions: i64,
    pub page_views: i64,
    pub average_session_duration: f64,
    /// Percentage (0-100).
    pub bounce_rate: f64,

    // Engagement events
    pub form_submissions: i64,
    pub newsletter_subscriptions: i64,
    pub product_views: i64,
    pub downloads: i64,
    pub whatsapp_clicks: i64,
    pub phone_clicks: i64,
    pub email_clicks: i64,

    // Conversion
    /// Percentage of sessions that submitted the RFQ form.
    pub lead_conversion_rate: f64,
    /// Percentage of started forms that were completed.
    pub form_completion_rate: f64,

    pub top_pages: Vec<TopPage>,
    pub top_referrers: Vec<TopReferrer>,
    pub device_breakdown: DeviceBreakdown,

    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Positive,
    Negative,
    Neutral,
}

/// Human-readable directional insight derived from two KPI snapshots.
/// `change` is a signed percentage, or percentage points for rate
/// metrics compared point-wise (bounce rate, anomaly conversion check).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsInsight {
    #[serde(rename = "type")]
    pub insight_type: InsightType,
    pub title: String,
    pub description: String,
    pub metric: String,
    pub change: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}
