use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::agents::{bool_field, evidence_of_type, f64_field, Agent};
use crate::error::Result;
use crate::models::{ActionType, Evidence, Recommendation};

/// Validates identity data completeness, format and expiry
pub struct IdentityAgent;

const REQUIRED_FIELDS: [&str; 3] = ["full_name", "date_of_birth", "id_number"];

#[async_trait]
impl Agent for IdentityAgent {
    fn name(&self) -> &str {
        "identity_agent"
    }

    async fn analyze(&self, evidence: &[Evidence]) -> Result<Recommendation> {
        let Some(identity) = evidence_of_type(evidence, "identity") else {
            return Ok(Recommendation::new(
                ActionType::ManualReview,
                0.0,
                "No identity evidence found. Manual review required.",
            )
            .with_risk(100, vec!["missing_identity".to_string()]));
        };

        let verified = bool_field(identity, "verified", false);
        let confidence = f64_field(identity, "confidence", 0.0);
        let extracted = identity
            .field("extracted_fields")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let missing_fields: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| !extracted.contains_key(*field))
            .collect();

        let expiry = extracted.get("expiry_date").and_then(|v| v.as_str());
        let is_expired = expiry.map(date_in_past).unwrap_or(false);

        let mut risk_score: u32 = 0;
        let mut risk_flags = Vec::new();

        if !missing_fields.is_empty() {
            risk_score += 30;
            risk_flags.push("incomplete_identity_data".to_string());
        }
        if !verified {
            risk_score += 40;
            risk_flags.push("identity_not_verified".to_string());
        }
        if is_expired {
            risk_score += 50;
            risk_flags.push("id_expired".to_string());
        }
        if confidence < 0.7 {
            risk_score += 20;
            risk_flags.push("low_extraction_confidence".to_string());
        }

        let (action, reasoning) = if is_expired {
            (
                ActionType::Reject,
                format!(
                    "Identity document has expired (expiry: {}). Cannot proceed.",
                    expiry.unwrap_or("unknown")
                ),
            )
        } else if !missing_fields.is_empty() {
            (
                ActionType::RequestMoreInfo,
                format!(
                    "Missing required identity fields: {}. Additional documentation needed.",
                    missing_fields.join(", ")
                ),
            )
        } else if confidence < 0.6 {
            (
                ActionType::ManualReview,
                format!(
                    "Identity extraction confidence is low ({}%). Manual verification recommended.",
                    (confidence * 100.0) as u32
                ),
            )
        } else if verified && confidence > 0.9 && risk_flags.is_empty() {
            (
                ActionType::Approve,
                "Identity verified with high confidence. All required fields present and valid."
                    .to_string(),
            )
        } else {
            (
                ActionType::Approve,
                format!("Identity verified. Confidence: {}%.", (confidence * 100.0) as u32),
            )
        };

        Ok(Recommendation::new(action, confidence, reasoning).with_risk(risk_score, risk_flags))
    }
}

/// Parse an ISO date or datetime and check it lies in the past
fn date_in_past(raw: &str) -> bool {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date < Utc::now().date_naive();
    }
    if let Ok(datetime) = chrono::DateTime::parse_from_rfc3339(raw) {
        return datetime.with_timezone(&Utc) < Utc::now();
    }
    false
}
