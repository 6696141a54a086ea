//! End-to-end decision pipeline scenarios over the in-memory stack.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use decision_platform::agents::{Agent, AgentRegistry, ComplianceAgent, IdentityAgent, RiskAgent};
use decision_platform::audit::{AuditLog, InMemoryAuditLog};
use decision_platform::cases::{CaseService, CreateCaseInput, ReviewDecision};
use decision_platform::error::{AppError, Result};
use decision_platform::models::{
    default_kyc_policy, ActionType, Actor, AuditEvent, CasePriority, CaseStatus, Evidence,
    Recommendation, ReviewReasoning, ReviewStage,
};
use decision_platform::orchestrator::AgentOrchestrator;
use decision_platform::policy::PolicyEngine;
use decision_platform::queues::QueueService;
use decision_platform::state::{InMemoryStore, QueueStore, RecommendationStore};

struct Stack {
    service: Arc<CaseService>,
    queues: QueueService,
    store: Arc<InMemoryStore>,
    audit: Arc<InMemoryAuditLog>,
}

async fn build_stack(registry: AgentRegistry) -> Stack {
    let store = Arc::new(InMemoryStore::new());
    let audit = Arc::new(InMemoryAuditLog::new());

    let policy_engine = Arc::new(PolicyEngine::new(store.clone(), audit.clone(), 60));
    policy_engine
        .publish_policy(default_kyc_policy())
        .await
        .unwrap();

    let orchestrator = Arc::new(AgentOrchestrator::new(
        registry,
        store.clone(),
        policy_engine.clone(),
        audit.clone(),
        5,
    ));

    let service = Arc::new(CaseService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        policy_engine,
        orchestrator,
        audit.clone(),
    ));

    Stack {
        service,
        queues: QueueService::new(store.clone()),
        store,
        audit,
    }
}

fn kyc_input() -> CreateCaseInput {
    CreateCaseInput {
        vertical: "kyc".to_string(),
        priority: CasePriority::Normal,
        customer_id: Some("cust_42".to_string()),
        metadata: HashMap::new(),
    }
}

async fn seed_evidence(service: &CaseService, case_id: &str, expiry: &str, sanctions: &str) {
    let id_confidence = if expiry < "2026-01-01" { 0.94 } else { 0.97 };
    service
        .add_evidence(
            case_id,
            "identity",
            json!({
                "verified": true,
                "confidence": id_confidence,
                "extracted_fields": {
                    "full_name": "John Doe",
                    "date_of_birth": "1985-03-15",
                    "id_number": "D1234567",
                    "expiry_date": expiry
                },
                "validation_checks": {"format_valid": true, "checksum_valid": true}
            }),
        )
        .await
        .unwrap();
    service
        .add_evidence(case_id, "address", json!({"verified": true}))
        .await
        .unwrap();
    service
        .add_evidence(
            case_id,
            "compliance",
            json!({
                "sanctions_screening": {"status": sanctions, "checked_lists": ["OFAC", "UN"]},
                "pep_screening": {"status": "clear"}
            }),
        )
        .await
        .unwrap();
    service
        .add_evidence(case_id, "risk_assessment", json!({"risk_score": 10}))
        .await
        .unwrap();
}

// ============================================================================
// S1: auto-approve path
// ============================================================================

#[tokio::test]
async fn auto_approve_path() {
    let stack = build_stack(AgentRegistry::with_default_agents()).await;

    let case = stack
        .service
        .create_case(kyc_input(), Actor::api())
        .await
        .unwrap();
    seed_evidence(&stack.service, &case.case_id, "2030-01-01", "clear").await;

    let decided = stack
        .service
        .submit_case(&case.case_id, Actor::api(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(decided.status, CaseStatus::Approved);
    assert_eq!(decided.sla_deadline, None);
    assert_eq!(decided.policy_version, case.policy_version);

    // All four agents approved
    let recs = stack
        .store
        .list_recommendations(&case.case_id)
        .await
        .unwrap();
    assert_eq!(recs.len(), 4);
    assert!(recs
        .iter()
        .all(|r| r.recommendation.action == ActionType::Approve));

    let ensemble = stack
        .store
        .latest_ensemble(&case.case_id)
        .await
        .unwrap()
        .unwrap();
    let final_rec = &ensemble.final_recommendation;
    assert_eq!(final_rec.action, ActionType::Approve);
    assert_eq!(final_rec.risk_score, 10);
    assert_eq!(final_rec.voting_details.approve_votes, 4);
    assert_eq!(final_rec.voting_details.consensus_level, "unanimous");
    assert!(final_rec.confidence > 0.95 && final_rec.confidence < 0.97);

    // The auto-approve rule made the call
    let history = stack.audit.case_history(&case.case_id).await.unwrap();
    let final_transition = history
        .iter()
        .filter(|e| e.event_type == "state_transition")
        .last()
        .unwrap();
    assert_eq!(
        final_transition.policy_rule_matched.as_deref(),
        Some("High Confidence Auto-Approve")
    );
}

// ============================================================================
// S2: sanctions escalation
// ============================================================================

#[tokio::test]
async fn sanctions_escalation() {
    let stack = build_stack(AgentRegistry::with_default_agents()).await;

    let case = stack
        .service
        .create_case(kyc_input(), Actor::api())
        .await
        .unwrap();
    seed_evidence(&stack.service, &case.case_id, "2030-01-01", "hit").await;

    let before = chrono::Utc::now();
    let decided = stack
        .service
        .submit_case(&case.case_id, Actor::api(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        decided.status,
        CaseStatus::UnderReview(ReviewStage::ManualReview)
    );

    let recs = stack
        .store
        .list_recommendations(&case.case_id)
        .await
        .unwrap();
    let compliance = recs
        .iter()
        .find(|r| r.agent_name == "compliance_agent")
        .unwrap();
    assert_eq!(compliance.recommendation.action, ActionType::Escalate);
    assert_eq!(compliance.recommendation.risk_score, Some(100));
    assert_eq!(compliance.recommendation.confidence, 0.99);

    let risk = recs.iter().find(|r| r.agent_name == "risk_agent").unwrap();
    assert_eq!(risk.recommendation.action, ActionType::Escalate);
    assert_eq!(risk.recommendation.risk_score, Some(100));

    // Aggregate risk 100 with non-unanimous approval under risk_weighted
    let ensemble = stack
        .store
        .latest_ensemble(&case.case_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ensemble.final_recommendation.risk_score, 100);
    assert_eq!(
        ensemble.final_recommendation.action,
        ActionType::ManualReview
    );
    assert_eq!(
        ensemble.final_recommendation.voting_details.consensus_level,
        "not_unanimous"
    );
    assert!(ensemble
        .final_recommendation
        .risk_flags
        .contains(&"sanctions_hit".to_string()));

    // Priority-1 rule drove the outcome and its queue assignment
    let history = stack.audit.case_history(&case.case_id).await.unwrap();
    let final_transition = history
        .iter()
        .filter(|e| e.event_type == "state_transition")
        .last()
        .unwrap();
    assert_eq!(
        final_transition.policy_rule_matched.as_deref(),
        Some("Sanctions Hit")
    );

    let assignments = stack.store.case_assignments(&case.case_id).await.unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].assigned_role, "senior_compliance_officer");
    let sla = assignments[0].sla_deadline.unwrap();
    assert!(sla > before + chrono::Duration::minutes(119));
    assert!(sla < before + chrono::Duration::minutes(121));

    // And it is claimable via the queue
    let claimable = stack
        .queues
        .list_claimable("senior_compliance_officer")
        .await
        .unwrap();
    assert_eq!(claimable.len(), 1);
    assert_eq!(claimable[0].case_id, case.case_id);
}

// ============================================================================
// S3: expired document falls through to the default rule
// ============================================================================

#[tokio::test]
async fn expired_document_falls_to_default_rule() {
    let stack = build_stack(AgentRegistry::with_default_agents()).await;

    let case = stack
        .service
        .create_case(kyc_input(), Actor::api())
        .await
        .unwrap();
    seed_evidence(&stack.service, &case.case_id, "2020-01-01", "clear").await;

    let decided = stack
        .service
        .submit_case(&case.case_id, Actor::api(), &CancellationToken::new())
        .await
        .unwrap();

    let recs = stack
        .store
        .list_recommendations(&case.case_id)
        .await
        .unwrap();
    let by_agent: HashMap<&str, &ActionType> = recs
        .iter()
        .map(|r| (r.agent_name.as_str(), &r.recommendation.action))
        .collect();
    assert_eq!(by_agent["identity_agent"], &ActionType::Reject);
    assert_eq!(by_agent["fraud_agent"], &ActionType::Approve);
    assert_eq!(by_agent["compliance_agent"], &ActionType::Approve);
    assert_eq!(by_agent["risk_agent"], &ActionType::Approve);

    // Medium aggregate risk: weighted vote approves 3 to 1, but the reject
    // vote drags confidence below the auto-approve bar, so the default rule
    // routes to manual review
    let ensemble = stack
        .store
        .latest_ensemble(&case.case_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ensemble.final_recommendation.action, ActionType::Approve);
    assert_eq!(
        ensemble.final_recommendation.voting_details.consensus_level,
        "weighted"
    );
    assert_eq!(ensemble.final_recommendation.voting_details.reject_votes, 1);
    assert_eq!(ensemble.final_recommendation.voting_details.approve_votes, 3);
    assert!(ensemble.final_recommendation.confidence < 0.95);

    assert_eq!(
        decided.status,
        CaseStatus::UnderReview(ReviewStage::ManualReview)
    );

    let history = stack.audit.case_history(&case.case_id).await.unwrap();
    let final_transition = history
        .iter()
        .filter(|e| e.event_type == "state_transition")
        .last()
        .unwrap();
    assert_eq!(
        final_transition.policy_rule_matched.as_deref(),
        Some("Default Manual Review")
    );

    // Per-agent reasoning surfaces in the synthesized reasoning
    let reasoning = &ensemble.final_recommendation.reasoning;
    assert!(reasoning.contains("Identity (reject, 94% confident)"));
    assert!(reasoning.contains("Fraud (approve, 95% confident)"));
    assert!(reasoning.contains("Compliance (approve, 98% confident)"));
    assert!(reasoning.contains("Risk (approve, 90% confident)"));
}

// ============================================================================
// S4: agent failure isolation
// ============================================================================

struct PanickingFraudAgent;

#[async_trait]
impl Agent for PanickingFraudAgent {
    fn name(&self) -> &str {
        "fraud_agent"
    }

    async fn analyze(&self, _evidence: &[Evidence]) -> Result<Recommendation> {
        panic!("injected fraud agent failure");
    }
}

#[tokio::test]
async fn agent_failure_is_isolated() {
    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(IdentityAgent));
    registry.register(Arc::new(PanickingFraudAgent));
    registry.register(Arc::new(ComplianceAgent));
    registry.register(Arc::new(RiskAgent));

    let stack = build_stack(registry).await;

    let case = stack
        .service
        .create_case(kyc_input(), Actor::api())
        .await
        .unwrap();
    seed_evidence(&stack.service, &case.case_id, "2030-01-01", "clear").await;

    // Processing completes without raising to the caller
    let decided = stack
        .service
        .submit_case(&case.case_id, Actor::api(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(
        decided.status.is_terminal()
            || decided.status == CaseStatus::UnderReview(ReviewStage::ManualReview)
    );

    // Four recommendations; the fraud agent's is the degraded substitute
    let recs = stack
        .store
        .list_recommendations(&case.case_id)
        .await
        .unwrap();
    assert_eq!(recs.len(), 4);

    let fraud = recs.iter().find(|r| r.agent_name == "fraud_agent").unwrap();
    assert_eq!(fraud.recommendation.action, ActionType::ManualReview);
    assert_eq!(fraud.recommendation.confidence, 0.0);
    assert!(fraud
        .recommendation
        .risk_flags
        .contains(&"agent_error".to_string()));

    // The failed agent's vote is present in the ensemble
    let ensemble = stack
        .store
        .latest_ensemble(&case.case_id)
        .await
        .unwrap()
        .unwrap();
    let vote = ensemble
        .agent_votes
        .iter()
        .find(|v| v.agent == "fraud_agent")
        .unwrap();
    assert_eq!(vote.action, ActionType::ManualReview);
    assert_eq!(vote.confidence, 0.0);

    let history = stack.audit.case_history(&case.case_id).await.unwrap();
    assert!(history.iter().any(|e| e.event_type == "agent.error"));
}

// ============================================================================
// S5: guarded transition refused
// ============================================================================

#[tokio::test]
async fn review_of_draft_case_is_refused() {
    let stack = build_stack(AgentRegistry::with_default_agents()).await;

    let case = stack
        .service
        .create_case(kyc_input(), Actor::api())
        .await
        .unwrap();

    let err = stack
        .service
        .review_case(
            &case.case_id,
            ReviewDecision {
                action: ActionType::Approve,
                reasoning: ReviewReasoning {
                    rationale:
                        "Verified the applicant identity against primary documents and registries."
                            .to_string(),
                    structured_checks: HashMap::new(),
                },
            },
            Actor::human("usr_9", "reviewer"),
        )
        .await
        .unwrap_err();

    match err {
        AppError::StateRefused {
            from,
            to,
            actor,
            required_actors,
        } => {
            assert_eq!(from, "draft");
            assert_eq!(to, "approved");
            assert_eq!(actor, "reviewer");
            // No state-machine entry covers draft → approved
            assert!(required_actors.is_empty());
        }
        other => panic!("expected StateRefused, got {other:?}"),
    }

    // Case unchanged; no transition recorded beyond the refusal marker
    let unchanged = stack.service.get_case(&case.case_id).await.unwrap();
    assert_eq!(unchanged.status, CaseStatus::Draft);

    let history = stack.audit.case_history(&case.case_id).await.unwrap();
    assert!(history.iter().all(|e| e.event_type != "state_transition"));
}

// ============================================================================
// S6: replay determinism
// ============================================================================

#[tokio::test]
async fn replay_is_deterministic() {
    let audit = InMemoryAuditLog::new();

    audit
        .append(AuditEvent::new("case_s6", "case.created", Actor::api()))
        .await
        .unwrap();
    audit
        .append(
            AuditEvent::new("case_s6", "state_transition", Actor::api())
                .with_transition(CaseStatus::Draft, CaseStatus::Submitted),
        )
        .await
        .unwrap();
    audit
        .append(
            AuditEvent::new("case_s6", "state_transition", Actor::system())
                .with_transition(CaseStatus::Submitted, CaseStatus::Processing),
        )
        .await
        .unwrap();
    audit
        .append(AuditEvent::new("case_s6", "ensemble.stored", Actor::system()))
        .await
        .unwrap();
    audit
        .append(
            AuditEvent::new("case_s6", "state_transition", Actor::system())
                .with_transition(CaseStatus::Processing, CaseStatus::Approved),
        )
        .await
        .unwrap();

    let first = audit.replay("case_s6", None).await.unwrap();
    let second = audit.replay("case_s6", None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.status.as_deref(), Some("approved"));
    assert_eq!(first.event_count, 5);
    assert!(first.ensemble_seen);
}

// ============================================================================
// Queue claim flow on top of a processed case
// ============================================================================

#[tokio::test]
async fn claimed_assignment_cannot_be_claimed_twice() {
    let stack = build_stack(AgentRegistry::with_default_agents()).await;

    let case = stack
        .service
        .create_case(kyc_input(), Actor::api())
        .await
        .unwrap();
    seed_evidence(&stack.service, &case.case_id, "2030-01-01", "hit").await;
    stack
        .service
        .submit_case(&case.case_id, Actor::api(), &CancellationToken::new())
        .await
        .unwrap();

    let claimed = stack
        .queues
        .claim("senior_compliance_officer", "usr_1", None)
        .await
        .unwrap();
    assert_eq!(claimed.case_id, case.case_id);

    let err = stack
        .queues
        .claim(
            "senior_compliance_officer",
            "usr_2",
            Some(claimed.assignment_id.as_str()),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "CONFLICT");
}

// ============================================================================
// Concurrent submission is serialized per case
// ============================================================================

#[tokio::test]
async fn concurrent_processing_is_serialized() {
    let stack = build_stack(AgentRegistry::with_default_agents()).await;

    let case = stack
        .service
        .create_case(kyc_input(), Actor::api())
        .await
        .unwrap();
    seed_evidence(&stack.service, &case.case_id, "2030-01-01", "clear").await;

    let service_a = stack.service.clone();
    let service_b = stack.service.clone();
    let id_a = case.case_id.clone();
    let id_b = case.case_id.clone();

    let (first, second) = tokio::join!(
        async move {
            service_a
                .submit_case(&id_a, Actor::api(), &CancellationToken::new())
                .await
        },
        async move {
            service_b
                .submit_case(&id_b, Actor::api(), &CancellationToken::new())
                .await
        },
    );

    // Both calls succeed; the loser observes the winner's terminal state
    assert_eq!(first.unwrap().status, CaseStatus::Approved);
    assert_eq!(second.unwrap().status, CaseStatus::Approved);

    // Exactly one processing run happened
    let recs = stack
        .store
        .list_recommendations(&case.case_id)
        .await
        .unwrap();
    assert_eq!(recs.len(), 4);

    let ensemble = stack
        .store
        .latest_ensemble(&case.case_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ensemble.attempt, 1);
}
