// HubSpot CRM Sync
//
// Best-effort push of a lead into HubSpot. Create-by-email first; on
// any failure fall back to search-by-email then update-by-id. This runs
// in the post-persistence fan-out, so nothing here ever escalates: all
// failures are caught, logged, and resolved to None.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::models::Lead;

const HUBSPOT_CONTACTS_URL: &str = "https://api.hubapi.com/crm/v3/objects/contacts";
const HUBSPOT_SEARCH_URL: &str = "https://api.hubapi.com/crm/v3/objects/contacts/search";

/// CRM seam used by the ingestion pipeline.
#[async_trait]
pub trait CrmSync: Send + Sync {
    /// Returns the remote contact id, or None when the sync made no
    /// change (unconfigured, rejected, or unreachable).
    async fn sync_lead(&self, lead: &Lead) -> Option<String>;
}

pub struct HubSpotClient {
    http: Client,
    api_key: Option<String>,
}

impl HubSpotClient {
    pub fn new(http: Client, api_key: Option<String>) -> Self {
        Self { http, api_key }
    }

    async fn create_contact(&self, key: &str, properties: &BTreeMap<String, String>) -> Option<String> {
        let response = self
            .http
            .post(HUBSPOT_CONTACTS_URL)
            .bearer_auth(key)
            .json(&json!({ "properties": properties }))
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                let body: Value = response.json().await.ok()?;
                body.get("id").and_then(Value::as_str).map(str::to_string)
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!("HubSpot contact creation failed ({}): {}", status, body);
                None
            }
            Err(e) => {
                error!("HubSpot contact creation request error: {}", e);
                None
            }
        }
    }

    /// Fallback path: find the contact by email, then patch it.
    async fn update_existing_contact(
        &self,
        key: &str,
        email: &str,
        properties: &BTreeMap<String, String>,
    ) -> Option<String> {
        let search = json!({
            "filterGroups": [{
                "filters": [{
                    "propertyName": "email",
                    "operator": "EQ",
                    "value": email,
                }]
            }]
        });

        let response = self
            .http
            .post(HUBSPOT_SEARCH_URL)
            .bearer_auth(key)
            .json(&search)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            error!("HubSpot contact search failed: {}", response.status());
            return None;
        }

        let body: Value = response.json().await.ok()?;
        let contact_id = body
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|result| result.get("id"))
            .and_then(Value::as_str)?
            .to_string();

        let update = self
            .http
            .patch(format!("{HUBSPOT_CONTACTS_URL}/{contact_id}"))
            .bearer_auth(key)
            .json(&json!({ "properties": properties }))
            .send()
            .await;

        match update {
            Ok(response) if response.status().is_success() => {
                let body: Value = response.json().await.ok()?;
                Some(
                    body.get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or(contact_id),
                )
            }
            Ok(response) => {
                error!("HubSpot contact update failed: {}", response.status());
                None
            }
            Err(e) => {
                error!("HubSpot contact update request error: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl CrmSync for HubSpotClient {
    async fn sync_lead(&self, lead: &Lead) -> Option<String> {
        let Some(key) = self.api_key.as_deref() else {
            warn!("HubSpot API key not configured, skipping CRM sync");
            return None;
        };

        let properties = contact_properties(lead);
        if let Some(id) = self.create_contact(key, &properties).await {
            return Some(id);
        }
        self.update_existing_contact(key, &lead.email, &properties).await
    }
}

/// Flatten a lead into HubSpot's string-valued contact properties.
/// The free-text name splits into first/last at the first space; array
/// metadata values are joined with ", ".
pub fn contact_properties(lead: &Lead) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();

    let (first_name, last_name) = match lead.name.as_deref() {
        Some(name) => match name.split_once(' ') {
            Some((first, rest)) => (first.to_string(), rest.to_string()),
            None => (name.to_string(), String::new()),
        },
        None => (String::new(), String::new()),
    };

    properties.insert("email".to_string(), lead.email.clone());
    properties.insert("firstname".to_string(), first_name);
    properties.insert("lastname".to_string(), last_name);
    properties.insert("company".to_string(), lead.company.clone().unwrap_or_default());
    properties.insert("phone".to_string(), lead.phone.clone().unwrap_or_default());
    properties.insert("website".to_string(), lead.referrer.clone().unwrap_or_default());
    properties.insert("hs_lead_status".to_string(), "NEW".to_string());
    properties.insert("lead_source".to_string(), lead.source.clone());

    let metadata = lead.metadata();
    let mut insert_opt = |key: &str, value: Option<String>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            properties.insert(key.to_string(), value);
        }
    };

    insert_opt(
        "product_interests",
        metadata.product_categories.map(|v| v.join(", ")),
    );
    insert_opt("estimated_volume", metadata.volume);
    insert_opt("weave_preference", metadata.weave_preference);
    insert_opt("custom_requirements", metadata.custom_requirements);
    insert_opt(
        "certification_requirements",
        metadata.certification_requirements.map(|v| v.join(", ")),
    );
    insert_opt("logistics_timeline", metadata.logistics_timeline);
    insert_opt("facility_preference", metadata.facility_preference);
    insert_opt("target_market", metadata.target_market);
    insert_opt("preferred_contact_method", metadata.preferred_contact_method);
    insert_opt("hear_about_us", metadata.hear_about_us);

    properties
}
