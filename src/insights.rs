// Insight Generation and Anomaly Detection
//
// Period-over-period commentary (insights) and investigate-now flags
// (anomalies) derived from KPI snapshots. Insights use metric-specific
// noise thresholds; anomalies use fixed, larger thresholds and only
// fire in the negative direction.

use crate::models::{AnalyticsInsight, InsightType, KpiMetrics};

// Below these magnitudes no insight is emitted, to avoid noise.
const USERS_THRESHOLD_PCT: f64 = 10.0;
const CONVERSION_THRESHOLD_PCT: f64 = 15.0;
const BOUNCE_THRESHOLD_POINTS: f64 = 5.0;
const FORM_THRESHOLD_PCT: f64 = 20.0;

// Anomaly cutoffs: drops past these signal something is likely broken.
const TRAFFIC_ANOMALY_DROP_PCT: f64 = -30.0;
const CONVERSION_ANOMALY_DROP_POINTS: f64 = -20.0;

/// Percentage change with a zero guard: an empty previous period reads
/// as "no change" rather than infinity, so no insight is emitted.
fn percent_change(current: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        (current - previous) / previous * 100.0
    } else {
        0.0
    }
}

/// Compare two KPI snapshots and emit directional insights for the four
/// tracked metrics: total users, lead conversion rate, bounce rate, and
/// form submissions.
pub fn generate_insights(current: &KpiMetrics, previous: &KpiMetrics) -> Vec<AnalyticsInsight> {
    let mut insights = Vec::new();

    let user_change = percent_change(current.total_users as f64, previous.total_users as f64);
    if user_change.abs() > USERS_THRESHOLD_PCT {
        let rising = user_change > 0.0;
        insights.push(AnalyticsInsight {
            insight_type: if rising {
                InsightType::Positive
            } else {
                InsightType::Negative
            },
            title: format!(
                "User Traffic {}",
                if rising { "Increased" } else { "Decreased" }
            ),
            description: format!(
                "Total users {} by {:.1}% compared to the previous period.",
                if rising { "increased" } else { "decreased" },
                user_change.abs()
            ),
            metric: "totalUsers".to_string(),
            change: user_change,
            recommendation: Some(
                if rising {
                    "Leverage the traffic increase with targeted CTAs and conversion optimization."
                } else {
                    "Review marketing campaigns and SEO performance. Consider content updates or promotional activities."
                }
                .to_string(),
            ),
        });
    }

    let conversion_change = percent_change(
        current.lead_conversion_rate,
        previous.lead_conversion_rate,
    );
    if conversion_change.abs() > CONVERSION_THRESHOLD_PCT {
        let rising = conversion_change > 0.0;
        insights.push(AnalyticsInsight {
            insight_type: if rising {
                InsightType::Positive
            } else {
                InsightType::Negative
            },
            title: format!(
                "Conversion Rate {}",
                if rising { "Improved" } else { "Declined" }
            ),
            description: format!(
                "Lead conversion rate {} by {:.1}%.",
                if rising { "improved" } else { "declined" },
                conversion_change.abs()
            ),
            metric: "leadConversionRate".to_string(),
            change: conversion_change,
            recommendation: Some(
                if rising {
                    "Analyze what's working and replicate successful patterns across the site."
                } else {
                    "Review form UX, reduce friction, and test different CTA placements."
                }
                .to_string(),
            ),
        });
    }

    // Bounce rate compares in percentage points and has inverted
    // polarity: rising bounce is negative.
    let bounce_change = current.bounce_rate - previous.bounce_rate;
    if bounce_change.abs() > BOUNCE_THRESHOLD_POINTS {
        let falling = bounce_change < 0.0;
        insights.push(AnalyticsInsight {
            insight_type: if falling {
                InsightType::Positive
            } else {
                InsightType::Negative
            },
            title: format!(
                "Bounce Rate {}",
                if falling { "Improved" } else { "Increased" }
            ),
            description: format!(
                "Bounce rate {} by {:.1} percentage points.",
                if falling { "decreased" } else { "increased" },
                bounce_change.abs()
            ),
            metric: "bounceRate".to_string(),
            change: bounce_change,
            recommendation: Some(
                if falling {
                    "Continue optimizing user experience and content quality."
                } else {
                    "Improve page load times, enhance content relevance, and optimize landing pages."
                }
                .to_string(),
            ),
        });
    }

    let form_change = percent_change(
        current.form_submissions as f64,
        previous.form_submissions as f64,
    );
    if form_change.abs() > FORM_THRESHOLD_PCT {
        let rising = form_change > 0.0;
        insights.push(AnalyticsInsight {
            insight_type: if rising {
                InsightType::Positive
            } else {
                InsightType::Negative
            },
            title: format!(
                "Form Submissions {}",
                if rising { "Increased" } else { "Decreased" }
            ),
            description: format!(
                "Form submissions {} by {:.1}%.",
                if rising { "increased" } else { "decreased" },
                form_change.abs()
            ),
            metric: "formSubmissions".to_string(),
            change: form_change,
            recommendation: Some(
                if rising {
                    "Capitalize on increased engagement with follow-up campaigns."
                } else {
                    "Review form placement, simplify form fields, and test different form designs."
                }
                .to_string(),
            ),
        });
    }

    insights
}

/// Compare a snapshot against a historical baseline and flag drops
/// severe enough to investigate immediately (broken form, tracking
/// outage). Only negative anomalies exist in this design.
pub fn detect_anomalies(current: &KpiMetrics, baseline: &KpiMetrics) -> Vec<AnalyticsInsight> {
    let mut anomalies = Vec::new();

    if baseline.total_users > 0 {
        let traffic_change =
            percent_change(current.total_users as f64, baseline.total_users as f64);
        if traffic_change < TRAFFIC_ANOMALY_DROP_PCT {
            anomalies.push(AnalyticsInsight {
                insight_type: InsightType::Negative,
                title: "Traffic Anomaly Detected".to_string(),
                description: format!(
                    "Traffic dropped by {:.1}% compared to the historical average. This may indicate an issue.",
                    traffic_change.abs()
                ),
                metric: "totalUsers".to_string(),
                change: traffic_change,
                recommendation: Some(
                    "Check for technical issues, SEO penalties, or marketing campaign changes. Review server logs and error tracking."
                        .to_string(),
                ),
            });
        }
    }

    let conversion_change = current.lead_conversion_rate - baseline.lead_conversion_rate;
    if conversion_change < CONVERSION_ANOMALY_DROP_POINTS {
        anomalies.push(AnalyticsInsight {
            insight_type: InsightType::Negative,
            title: "Conversion Rate Anomaly".to_string(),
            description: format!(
                "Conversion rate dropped by {:.1} percentage points.",
                conversion_change.abs()
            ),
            metric: "leadConversionRate".to_string(),
            change: conversion_change,
            recommendation: Some(
                "Review form functionality, check for broken links, and test user flows. Verify CRM integration is working."
                    .to_string(),
            ),
        });
    }

    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kpis(total_users: i64, conversion: f64, bounce: f64, forms: i64) -> KpiMetrics {
        KpiMetrics {
            total_users,
            lead_conversion_rate: conversion,
            bounce_rate: bounce,
            form_submissions: forms,
            ..Default::default()
        }
    }

    #[test]
    fn halved_traffic_yields_a_negative_insight() {
        let current = kpis(500, 2.0, 40.0, 10);
        let previous = kpis(1000, 2.0, 40.0, 10);
        let insights = generate_insights(&current, &previous);

        assert_eq!(insights.len(), 1);
        let insight = &insights[0];
        assert_eq!(insight.metric, "totalUsers");
        assert_eq!(insight.insight_type, InsightType::Negative);
        assert!((insight.change - -50.0).abs() < 1e-9);
        assert!(insight.recommendation.is_some());
    }

    #[test]
    fn changes_below_threshold_stay_silent() {
        let current = kpis(109, 2.2, 42.0, 11);
        let previous = kpis(100, 2.0, 40.0, 10);
        // +9% users, +10% conversion, +2 bounce points, +10% forms: all
        // below their thresholds.
        assert!(generate_insights(&current, &previous).is_empty());
    }

    #[test]
    fn zero_previous_denominator_emits_nothing() {
        let current = kpis(500, 5.0, 0.0, 25);
        let previous = kpis(0, 0.0, 0.0, 0);
        let insights = generate_insights(&current, &previous);
        for insight in &insights {
            assert!(insight.change.is_finite());
        }
        // Users, conversion, and forms all divide by zero; bounce moved
        // zero points. Nothing to report.
        assert!(insights.is_empty());
    }

    #[test]
    fn rising_bounce_rate_is_negative() {
        let current = kpis(100, 2.0, 58.0, 10);
        let previous = kpis(100, 2.0, 50.0, 10);
        let insights = generate_insights(&current, &previous);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].metric, "bounceRate");
        assert_eq!(insights[0].insight_type, InsightType::Negative);
        assert!((insights[0].change - 8.0).abs() < 1e-9);
    }

    #[test]
    fn falling_bounce_rate_is_positive() {
        let current = kpis(100, 2.0, 40.0, 10);
        let previous = kpis(100, 2.0, 50.0, 10);
        let insights = generate_insights(&current, &previous);
        assert_eq!(insights[0].insight_type, InsightType::Positive);
    }

    #[test]
    fn form_surge_is_positive() {
        let current = kpis(100, 2.0, 40.0, 30);
        let previous = kpis(100, 2.0, 40.0, 20);
        let insights = generate_insights(&current, &previous);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].metric, "formSubmissions");
        assert_eq!(insights[0].insight_type, InsightType::Positive);
    }

    #[test]
    fn forty_percent_traffic_drop_is_an_anomaly() {
        let current = kpis(60, 2.0, 40.0, 10);
        let baseline = kpis(100, 2.0, 40.0, 10);
        let anomalies = detect_anomalies(&current, &baseline);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].metric, "totalUsers");
        assert!((anomalies[0].change - -40.0).abs() < 1e-9);
    }

    #[test]
    fn twenty_percent_traffic_drop_is_not_an_anomaly() {
        let current = kpis(80, 2.0, 40.0, 10);
        let baseline = kpis(100, 2.0, 40.0, 10);
        assert!(detect_anomalies(&current, &baseline).is_empty());
    }

    #[test]
    fn conversion_collapse_in_points_is_an_anomaly() {
        let current = kpis(100, 4.0, 40.0, 10);
        let baseline = kpis(100, 30.0, 40.0, 10);
        let anomalies = detect_anomalies(&current, &baseline);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].metric, "leadConversionRate");
    }

    #[test]
    fn empty_baseline_produces_no_traffic_anomaly() {
        let current = kpis(0, 0.0, 0.0, 0);
        let baseline = kpis(0, 0.0, 0.0, 0);
        assert!(detect_anomalies(&current, &baseline).is_empty());
    }
}
