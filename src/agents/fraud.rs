use async_trait::async_trait;

use crate::agents::{bool_field, evidence_of_type, f64_field, Agent};
use crate::error::Result;
use crate::models::{ActionType, Evidence, Recommendation};

/// Detects document tampering signals from identity validation checks
pub struct FraudAgent;

#[async_trait]
impl Agent for FraudAgent {
    fn name(&self) -> &str {
        "fraud_agent"
    }

    async fn analyze(&self, evidence: &[Evidence]) -> Result<Recommendation> {
        let Some(identity) = evidence_of_type(evidence, "identity") else {
            return Ok(Recommendation::new(
                ActionType::ManualReview,
                0.0,
                "No identity evidence available for fraud analysis.",
            )
            .with_risk(100, vec!["missing_identity".to_string()]));
        };

        let format_valid = bool_field(identity, "validation_checks.format_valid", true);
        let checksum_valid = bool_field(identity, "validation_checks.checksum_valid", true);
        let confidence = f64_field(identity, "confidence", 0.9);

        let mut fraud_indicators = Vec::new();
        let mut risk_score: u32 = 10;

        if !format_valid {
            fraud_indicators.push("invalid_format".to_string());
            risk_score += 30;
        }
        if !checksum_valid {
            fraud_indicators.push("checksum_mismatch".to_string());
            risk_score += 40;
        }
        if confidence < 0.6 {
            fraud_indicators.push("poor_image_quality".to_string());
            risk_score += 20;
        }

        let (action, final_confidence, reasoning) = match fraud_indicators.len() {
            n if n >= 2 => (
                ActionType::Escalate,
                0.3,
                format!(
                    "Multiple fraud indicators detected: {}. Escalation to fraud team required.",
                    fraud_indicators.join(", ")
                ),
            ),
            1 => (
                ActionType::ManualReview,
                0.6,
                format!(
                    "Potential fraud indicator: {}. Manual review recommended.",
                    fraud_indicators[0]
                ),
            ),
            _ => (
                ActionType::Approve,
                0.95,
                "No fraud indicators detected. Document appears authentic.".to_string(),
            ),
        };

        Ok(Recommendation::new(action, final_confidence, reasoning)
            .with_risk(risk_score, fraud_indicators))
    }
}
