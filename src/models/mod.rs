pub mod audit;
pub mod case;
pub mod evidence;
pub mod policy;
pub mod queue;
pub mod recommendation;
pub mod user;

pub use audit::*;
pub use case::*;
pub use evidence::*;
pub use policy::*;
pub use queue::*;
pub use recommendation::*;
pub use user::*;

use chrono::Utc;
use std::collections::HashMap;

/// Default KYC individual-verification policy installed by the bootstrap
/// command and used throughout the test suite.
pub fn default_kyc_policy() -> Policy {
    let mut agent_weights = HashMap::new();
    agent_weights.insert("compliance_agent".to_string(), 2.0);
    agent_weights.insert("identity_agent".to_string(), 1.0);
    agent_weights.insert("fraud_agent".to_string(), 1.0);
    agent_weights.insert("risk_agent".to_string(), 1.5);

    let mut transitions = HashMap::new();
    let allow = |actors: &[&str]| TransitionSpec {
        allowed_actors: actors.iter().map(|a| a.to_string()).collect(),
    };
    transitions.insert("draft → submitted".to_string(), allow(&["customer", "api"]));
    transitions.insert("submitted → processing".to_string(), allow(&["system"]));
    transitions.insert(
        "processing → under_review.*".to_string(),
        allow(&["system", "workflow_engine"]),
    );
    transitions.insert(
        "processing → approved".to_string(),
        allow(&["system", "workflow_engine"]),
    );
    transitions.insert(
        "processing → rejected".to_string(),
        allow(&["system", "workflow_engine"]),
    );
    transitions.insert(
        "under_review.* → approved".to_string(),
        allow(&["workflow_engine", "reviewer"]),
    );
    transitions.insert(
        "under_review.* → rejected".to_string(),
        allow(&["workflow_engine", "reviewer"]),
    );
    transitions.insert(
        "under_review.* → needs_more_info".to_string(),
        allow(&["reviewer"]),
    );
    transitions.insert(
        "needs_more_info → submitted".to_string(),
        allow(&["customer"]),
    );
    transitions.insert("* → expired".to_string(), allow(&["system"]));

    Policy {
        policy_id: "pol_kyc_v1".to_string(),
        policy_name: "KYC Individual Verification".to_string(),
        version: "1.0".to_string(),
        vertical: "kyc".to_string(),
        active: true,
        created_at: Utc::now(),
        created_by: "system".to_string(),
        voting_strategy: VotingStrategyConfig {
            strategy: VotingStrategyKind::RiskWeighted,
            config: VotingConfig {
                agent_weights,
                high_risk_threshold: 70,
                low_risk_threshold: 30,
            },
        },
        rules: vec![
            PolicyRule {
                priority: 1,
                name: "Sanctions Hit".to_string(),
                condition: "compliance.sanctions_screening.status == 'hit'".to_string(),
                action: ActionType::Escalate,
                assignee_role: Some("senior_compliance_officer".to_string()),
                sla_hours: Some(2),
                mandatory_reasoning: true,
            },
            PolicyRule {
                priority: 2,
                name: "High Confidence Auto-Approve".to_string(),
                condition: "ensemble.confidence > 0.95 and ensemble.risk_score < 20".to_string(),
                action: ActionType::Approve,
                assignee_role: None,
                sla_hours: None,
                mandatory_reasoning: false,
            },
            PolicyRule {
                priority: 3,
                name: "Low Confidence Manual Review".to_string(),
                condition: "ensemble.confidence < 0.70".to_string(),
                action: ActionType::ManualReview,
                assignee_role: Some("kyc_analyst".to_string()),
                sla_hours: Some(24),
                mandatory_reasoning: false,
            },
            PolicyRule {
                priority: 99,
                name: "Default Manual Review".to_string(),
                condition: "*".to_string(),
                action: ActionType::ManualReview,
                assignee_role: Some("kyc_analyst".to_string()),
                sla_hours: Some(24),
                mandatory_reasoning: false,
            },
        ],
        state_machine: StateMachine {
            states: vec![
                "draft",
                "submitted",
                "processing",
                "under_review",
                "under_review.identity_check",
                "under_review.fraud_check",
                "under_review.compliance_check",
                "under_review.manual_review",
                "approved",
                "rejected",
                "needs_more_info",
                "expired",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            transitions,
            terminal_states: vec!["approved", "rejected", "expired"]
                .into_iter()
                .map(String::from)
                .collect(),
        },
    }
}
