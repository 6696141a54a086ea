use async_trait::async_trait;
use std::collections::HashMap;

use crate::agents::{bool_field, evidence_of_type, f64_field, str_field, Agent};
use crate::error::Result;
use crate::models::{ActionType, ConfidenceBreakdown, Evidence, Recommendation};

/// Aggregates risk signals across all evidence types into one score
pub struct RiskAgent;

#[async_trait]
impl Agent for RiskAgent {
    fn name(&self) -> &str {
        "risk_agent"
    }

    async fn analyze(&self, evidence: &[Evidence]) -> Result<Recommendation> {
        let mut risk_factors: HashMap<String, f64> = HashMap::new();
        let mut risk_flags: Vec<String> = Vec::new();
        let mut total_risk: u32 = 0;

        // Identity risk
        match evidence_of_type(evidence, "identity") {
            Some(identity) => {
                let identity_conf = f64_field(identity, "confidence", 0.5);
                if identity_conf < 0.7 {
                    risk_factors.insert("low_identity_confidence".to_string(), 20.0);
                    risk_flags.push("low_identity_confidence".to_string());
                    total_risk += 20;
                }
            }
            None => {
                risk_factors.insert("missing_identity".to_string(), 50.0);
                risk_flags.push("missing_identity".to_string());
                total_risk += 50;
            }
        }

        // Address risk
        if let Some(address) = evidence_of_type(evidence, "address") {
            if !bool_field(address, "verified", false) {
                risk_factors.insert("address_unverified".to_string(), 15.0);
                risk_flags.push("address_unverified".to_string());
                total_risk += 15;
            }
        }

        // Sanctions hit overrides everything
        if let Some(compliance) = evidence_of_type(evidence, "compliance") {
            if str_field(compliance, "sanctions_screening.status") == Some("hit") {
                risk_factors.insert("sanctions_hit".to_string(), 100.0);
                risk_flags.push("sanctions_hit".to_string());
                total_risk = 100;
            }
        }

        // Explicit risk assessment takes the max and contributes its flags
        if let Some(assessment) = evidence_of_type(evidence, "risk_assessment") {
            let explicit = f64_field(assessment, "risk_score", 0.0) as u32;
            total_risk = total_risk.max(explicit);

            if let Some(flags) = assessment.field("risk_flags").and_then(|v| v.as_array()) {
                for flag in flags.iter().filter_map(|v| v.as_str()) {
                    if !risk_flags.iter().any(|f| f == flag) {
                        risk_flags.push(flag.to_string());
                    }
                }
            }
        }

        let risk_score = total_risk.min(100);

        let (action, confidence, reasoning) = if risk_score >= 80 {
            (
                ActionType::Escalate,
                0.9,
                format!(
                    "HIGH RISK (score: {risk_score}). Escalation required. Risk factors: {}.",
                    risk_flags.join(", ")
                ),
            )
        } else if risk_score >= 50 {
            (
                ActionType::ManualReview,
                0.75,
                format!(
                    "MEDIUM RISK (score: {risk_score}). Manual review recommended. Risk factors: {}.",
                    risk_flags.join(", ")
                ),
            )
        } else if risk_score >= 30 {
            (
                ActionType::ManualReview,
                0.8,
                format!("LOW-MEDIUM RISK (score: {risk_score}). Quick review suggested."),
            )
        } else {
            (
                ActionType::Approve,
                0.9,
                format!("LOW RISK (score: {risk_score}). Risk within acceptable parameters."),
            )
        };

        let mut rec =
            Recommendation::new(action, confidence, reasoning).with_risk(risk_score, risk_flags);
        rec.confidence_breakdown = Some(ConfidenceBreakdown {
            overall: confidence,
            components: risk_factors,
        });
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_low_risk_approves() {
        let evidence = vec![
            Evidence::new("case_1", "identity", json!({"confidence": 0.97})),
            Evidence::new("case_1", "address", json!({"verified": true})),
            Evidence::new(
                "case_1",
                "compliance",
                json!({"sanctions_screening": {"status": "clear"}}),
            ),
            Evidence::new("case_1", "risk_assessment", json!({"risk_score": 10})),
        ];

        let rec = RiskAgent.analyze(&evidence).await.unwrap();
        assert_eq!(rec.action, ActionType::Approve);
        assert_eq!(rec.risk_score, Some(10));
        assert_eq!(rec.confidence, 0.9);
    }

    #[tokio::test]
    async fn test_sanctions_hit_overrides_to_max() {
        let evidence = vec![
            Evidence::new("case_1", "identity", json!({"confidence": 0.97})),
            Evidence::new(
                "case_1",
                "compliance",
                json!({"sanctions_screening": {"status": "hit"}}),
            ),
        ];

        let rec = RiskAgent.analyze(&evidence).await.unwrap();
        assert_eq!(rec.action, ActionType::Escalate);
        assert_eq!(rec.risk_score, Some(100));
        assert!(rec.risk_flags.contains(&"sanctions_hit".to_string()));
    }

    #[tokio::test]
    async fn test_missing_identity_is_medium_risk() {
        let rec = RiskAgent.analyze(&[]).await.unwrap();
        // 50 from missing identity
        assert_eq!(rec.risk_score, Some(50));
        assert_eq!(rec.action, ActionType::ManualReview);
        assert!(rec.risk_flags.contains(&"missing_identity".to_string()));
    }

    #[tokio::test]
    async fn test_unverified_address_adds_risk() {
        let evidence = vec![
            Evidence::new("case_1", "identity", json!({"confidence": 0.95})),
            Evidence::new("case_1", "address", json!({"verified": false})),
        ];

        let rec = RiskAgent.analyze(&evidence).await.unwrap();
        assert_eq!(rec.risk_score, Some(15));
        assert!(rec.risk_flags.contains(&"address_unverified".to_string()));
        assert_eq!(rec.action, ActionType::Approve);
    }

    #[tokio::test]
    async fn test_explicit_assessment_flags_are_merged() {
        let evidence = vec![
            Evidence::new("case_1", "identity", json!({"confidence": 0.6})),
            Evidence::new(
                "case_1",
                "risk_assessment",
                json!({"risk_score": 35, "risk_flags": ["country_risk", "low_identity_confidence"]}),
            ),
        ];

        let rec = RiskAgent.analyze(&evidence).await.unwrap();
        // max(20 identity, 35 explicit)
        assert_eq!(rec.risk_score, Some(35));
        assert_eq!(rec.action, ActionType::ManualReview);
        assert!(rec.risk_flags.contains(&"country_risk".to_string()));
        // No duplicate flag
        assert_eq!(
            rec.risk_flags
                .iter()
                .filter(|f| *f == "low_identity_confidence")
                .count(),
            1
        );
    }
}
