use async_trait::async_trait;
use std::collections::HashMap;

use crate::agents::{evidence_of_type, str_field, Agent};
use crate::error::Result;
use crate::models::{ActionType, ConfidenceBreakdown, Evidence, Recommendation};

/// Performs sanctions and PEP screening assessment
pub struct ComplianceAgent;

#[async_trait]
impl Agent for ComplianceAgent {
    fn name(&self) -> &str {
        "compliance_agent"
    }

    async fn analyze(&self, evidence: &[Evidence]) -> Result<Recommendation> {
        let Some(compliance) = evidence_of_type(evidence, "compliance") else {
            return Ok(Recommendation::new(
                ActionType::ManualReview,
                0.0,
                "No compliance screening performed. Manual review required.",
            )
            .with_risk(100, vec!["missing_compliance".to_string()]));
        };

        let sanctions_status = str_field(compliance, "sanctions_screening.status").unwrap_or("unknown");
        let pep_status = str_field(compliance, "pep_screening.status").unwrap_or("clear");
        let checked_lists: Vec<String> = compliance
            .field("sanctions_screening.checked_lists")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let (action, confidence, risk_score, risk_flags, reasoning) = match (sanctions_status, pep_status) {
            ("hit", _) => (
                ActionType::Escalate,
                0.99,
                100,
                vec!["sanctions_hit".to_string()],
                format!(
                    "SANCTIONS HIT: Individual matches sanctioned entity. Lists checked: {}. Immediate escalation required.",
                    checked_lists.join(", ")
                ),
            ),
            ("potential_match", _) => (
                ActionType::ManualReview,
                0.7,
                70,
                vec!["potential_sanctions_match".to_string()],
                "Potential sanctions match found. Manual review required to confirm or clear."
                    .to_string(),
            ),
            (_, "hit") => (
                ActionType::ManualReview,
                0.8,
                60,
                vec!["pep_match".to_string()],
                "Individual identified as Politically Exposed Person (PEP). Enhanced due diligence required."
                    .to_string(),
            ),
            ("clear", _) => (
                ActionType::Approve,
                0.98,
                0,
                Vec::new(),
                format!(
                    "Compliance screening passed. No sanctions or PEP matches found. Lists checked: {}.",
                    checked_lists.join(", ")
                ),
            ),
            _ => (
                ActionType::ManualReview,
                0.5,
                50,
                vec!["screening_incomplete".to_string()],
                "Compliance screening status unclear. Manual review required.".to_string(),
            ),
        };

        let mut components = HashMap::new();
        components.insert(
            "sanctions_screening".to_string(),
            if sanctions_status == "clear" { 1.0 } else { 0.0 },
        );
        components.insert(
            "pep_screening".to_string(),
            if pep_status == "clear" { 1.0 } else { 0.5 },
        );

        let mut rec =
            Recommendation::new(action, confidence, reasoning).with_risk(risk_score, risk_flags);
        rec.confidence_breakdown = Some(ConfidenceBreakdown {
            overall: confidence,
            components,
        });
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compliance_evidence(data: serde_json::Value) -> Vec<Evidence> {
        vec![Evidence::new("case_1", "compliance", data)]
    }

    #[tokio::test]
    async fn test_sanctions_hit_escalates_at_max_risk() {
        let evidence = compliance_evidence(json!({
            "sanctions_screening": {"status": "hit", "checked_lists": ["OFAC", "UN"]},
            "pep_screening": {"status": "clear"}
        }));

        let rec = ComplianceAgent.analyze(&evidence).await.unwrap();
        assert_eq!(rec.action, ActionType::Escalate);
        assert_eq!(rec.confidence, 0.99);
        assert_eq!(rec.risk_score, Some(100));
        assert!(rec.risk_flags.contains(&"sanctions_hit".to_string()));
        assert!(rec.reasoning.contains("OFAC, UN"));
    }

    #[tokio::test]
    async fn test_potential_match_manual_review() {
        let evidence = compliance_evidence(json!({
            "sanctions_screening": {"status": "potential_match"}
        }));

        let rec = ComplianceAgent.analyze(&evidence).await.unwrap();
        assert_eq!(rec.action, ActionType::ManualReview);
        assert_eq!(rec.risk_score, Some(70));
        assert_eq!(rec.confidence, 0.7);
    }

    #[tokio::test]
    async fn test_pep_hit_manual_review() {
        let evidence = compliance_evidence(json!({
            "sanctions_screening": {"status": "clear"},
            "pep_screening": {"status": "hit"}
        }));

        let rec = ComplianceAgent.analyze(&evidence).await.unwrap();
        assert_eq!(rec.action, ActionType::ManualReview);
        assert_eq!(rec.risk_score, Some(60));
        assert!(rec.risk_flags.contains(&"pep_match".to_string()));
    }

    #[tokio::test]
    async fn test_clear_screening_approves() {
        let evidence = compliance_evidence(json!({
            "sanctions_screening": {"status": "clear", "checked_lists": ["OFAC", "UN", "EU"]},
            "pep_screening": {"status": "clear"}
        }));

        let rec = ComplianceAgent.analyze(&evidence).await.unwrap();
        assert_eq!(rec.action, ActionType::Approve);
        assert_eq!(rec.confidence, 0.98);
        assert_eq!(rec.risk_score, Some(0));
        let breakdown = rec.confidence_breakdown.unwrap();
        assert_eq!(breakdown.components["sanctions_screening"], 1.0);
    }

    #[tokio::test]
    async fn test_unknown_status_manual_review() {
        let evidence = compliance_evidence(json!({"sanctions_screening": {"status": "pending"}}));

        let rec = ComplianceAgent.analyze(&evidence).await.unwrap();
        assert_eq!(rec.action, ActionType::ManualReview);
        assert_eq!(rec.risk_score, Some(50));
        assert!(rec.risk_flags.contains(&"screening_incomplete".to_string()));
    }

    #[tokio::test]
    async fn test_missing_compliance_degrades() {
        let rec = ComplianceAgent.analyze(&[]).await.unwrap();
        assert_eq!(rec.action, ActionType::ManualReview);
        assert_eq!(rec.confidence, 0.0);
        assert_eq!(rec.risk_score, Some(100));
        assert!(rec.risk_flags.contains(&"missing_compliance".to_string()));
    }
}
