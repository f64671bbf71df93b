// Lead Submission Validation
//
// The RFQ form is assembled client-side over four steps but validated
// server-side as one unit. Each step has its own fragment validator;
// the top-level validator runs all four and aggregates every failing
// field so the form can surface the complete error list in one pass.
// Pure functions: no I/O, deterministic given input.

use serde::Serialize;
use validator::ValidateEmail;

use crate::models::{LeadMetadata, LeadSubmission, ValidatedLead};

const MIN_NAME_LEN: usize = 2;
const MIN_MESSAGE_LEN: usize = 10;

/// One failing field with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Step 1: contact information.
fn validate_contact_info(submission: &LeadSubmission, errors: &mut Vec<FieldError>) {
    match submission.email.as_deref().map(str::trim) {
        None | Some("") => {
            errors.push(FieldError::new("email", "Email is required"));
        }
        Some(email) if !email.validate_email() => {
            errors.push(FieldError::new("email", "Please enter a valid email address"));
        }
        Some(_) => {}
    }

    if let Some(name) = submission.name.as_deref() {
        if !name.trim().is_empty() && name.trim().chars().count() < MIN_NAME_LEN {
            errors.push(FieldError::new(
                "name",
                format!("Name must be at least {MIN_NAME_LEN} characters"),
            ));
        }
    }
}

/// Step 2: product interests. At least one category is required.
fn validate_product_interests(submission: &LeadSubmission, errors: &mut Vec<FieldError>) {
    let has_category = submission
        .product_categories
        .as_ref()
        .is_some_and(|categories| categories.iter().any(|c| !c.trim().is_empty()));
    if !has_category {
        errors.push(FieldError::new(
            "productCategories",
            "Please select at least one product category",
        ));
    }
}

/// Step 3: sourcing requirements. Everything here is optional; only
/// shape problems are reported.
fn validate_requirements(submission: &LeadSubmission, errors: &mut Vec<FieldError>) {
    if let Some(certifications) = submission.certification_requirements.as_ref() {
        if certifications.iter().any(|c| c.trim().is_empty()) {
            errors.push(FieldError::new(
                "certificationRequirements",
                "Certification entries must not be empty",
            ));
        }
    }
}

/// Step 4: additional information.
fn validate_additional_info(submission: &LeadSubmission, errors: &mut Vec<FieldError>) {
    match submission.message.as_deref().map(str::trim) {
        None | Some("") => {
            errors.push(FieldError::new("message", "Message is required"));
        }
        Some(message) if message.chars().count() < MIN_MESSAGE_LEN => {
            errors.push(FieldError::new(
                "message",
                format!("Message must be at least {MIN_MESSAGE_LEN} characters"),
            ));
        }
        Some(_) => {}
    }
}

/// Validate a raw submission against all four fragments, aggregating
/// every failing field rather than short-circuiting on the first.
pub fn validate_lead(submission: &LeadSubmission) -> Result<ValidatedLead, Vec<FieldError>> {
    let mut errors = Vec::new();

    validate_contact_info(submission, &mut errors);
    validate_product_interests(submission, &mut errors);
    validate_requirements(submission, &mut errors);
    validate_additional_info(submission, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    let metadata = LeadMetadata {
        product_categories: submission.product_categories.clone(),
        volume: submission.volume.clone(),
        weave_preference: submission.weave_preference.clone(),
        custom_requirements: submission.custom_requirements.clone(),
        certification_requirements: submission.certification_requirements.clone(),
        logistics_timeline: submission.logistics_timeline.clone(),
        facility_preference: submission.facility_preference.clone(),
        target_market: submission.target_market.clone(),
        preferred_contact_method: submission.preferred_contact_method.clone(),
        hear_about_us: submission.hear_about_us.clone(),
        extra: submission.metadata.clone().unwrap_or_default(),
    };

    Ok(ValidatedLead {
        email: submission.email.as_deref().unwrap_or_default().trim().to_string(),
        name: submission
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        phone: submission.phone.clone(),
        company: submission.company.clone(),
        message: submission.message.as_deref().unwrap_or_default().trim().to_string(),
        source: submission
            .source
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "web".to_string()),
        referrer: submission.referrer.clone(),
        metadata,
    })
}

/// Shared email rule for the newsletter endpoint.
pub fn validate_newsletter_email(email: &str) -> Result<String, FieldError> {
    let email = email.trim();
    if email.validate_email() {
        Ok(email.to_string())
    } else {
        Err(FieldError::new("email", "Invalid email address"))
    }
}
