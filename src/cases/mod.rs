use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditLog;
use crate::error::{AppError, Result};
use crate::models::{
    Actor, AuditEvent, Case, CasePriority, CaseStatus, Document, EnsembleDecision, Evidence,
    ReviewReasoning, ReviewStage, ActionType, QueueAssignment,
};
use crate::orchestrator::AgentOrchestrator;
use crate::policy::{PolicyEngine, RuleMatch};
use crate::state::{
    CaseFilter, CaseStore, DocumentStore, EvidenceStore, QueueStore, RecommendationStore,
};

/// Input for case creation
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCaseInput {
    pub vertical: String,
    #[serde(default)]
    pub priority: CasePriority,
    pub customer_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A human review verdict
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewDecision {
    pub action: ActionType,
    pub reasoning: ReviewReasoning,
}

/// Case plus its related records, for detail views
#[derive(Debug, Clone, Serialize)]
pub struct CaseDetails {
    pub case: Case,
    pub documents: Vec<Document>,
    pub evidence: Vec<Evidence>,
    pub ensemble: Option<EnsembleDecision>,
}

const MIN_RATIONALE_LEN: usize = 50;

/// Lifecycle coordinator: sequences evidence collection, agent fan-out,
/// ensemble synthesis, rule evaluation and the guarded state transitions.
pub struct CaseService {
    cases: Arc<dyn CaseStore>,
    documents: Arc<dyn DocumentStore>,
    evidence: Arc<dyn EvidenceStore>,
    recommendations: Arc<dyn RecommendationStore>,
    queue: Arc<dyn QueueStore>,
    policy_engine: Arc<PolicyEngine>,
    orchestrator: Arc<AgentOrchestrator>,
    audit: Arc<dyn AuditLog>,

    /// Per-case advisory locks; a case is processed by one worker at a time
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CaseService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cases: Arc<dyn CaseStore>,
        documents: Arc<dyn DocumentStore>,
        evidence: Arc<dyn EvidenceStore>,
        recommendations: Arc<dyn RecommendationStore>,
        queue: Arc<dyn QueueStore>,
        policy_engine: Arc<PolicyEngine>,
        orchestrator: Arc<AgentOrchestrator>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            cases,
            documents,
            evidence,
            recommendations,
            queue,
            policy_engine,
            orchestrator,
            audit,
            locks: DashMap::new(),
        }
    }

    pub fn audit(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }

    pub fn policy_engine(&self) -> &Arc<PolicyEngine> {
        &self.policy_engine
    }

    /// Create a new DRAFT case bound to the active policy of its vertical
    pub async fn create_case(&self, input: CreateCaseInput, actor: Actor) -> Result<Case> {
        let policy = self.policy_engine.active_policy(&input.vertical).await?;

        let case = Case::new(
            input.vertical.clone(),
            input.priority,
            policy.policy_id.clone(),
            input.customer_id,
            input.metadata,
        );
        self.cases.save_case(&case).await?;

        let event = AuditEvent::new(&case.case_id, "case.created", actor)
            .with_policy_version(&case.policy_version)
            .with_metadata("vertical", json!(input.vertical));
        self.audit.append(event).await?;

        tracing::info!(
            case_id = %case.case_id,
            vertical = %case.vertical,
            policy_version = %case.policy_version,
            "Case created"
        );
        Ok(case)
    }

    /// Submit a case for processing. Submitting an already-submitted case is
    /// a no-op returning the current state; processing runs synchronously
    /// from the caller's view.
    pub async fn submit_case(
        &self,
        case_id: &str,
        actor: Actor,
        cancel: &CancellationToken,
    ) -> Result<Case> {
        // The submit transition happens under the per-case lock so a pair of
        // racing submissions cannot both attempt DRAFT → SUBMITTED
        {
            let lock = self.case_lock(case_id);
            let _guard = lock.lock().await;

            let case = self.get_case(case_id).await?;
            match case.status {
                CaseStatus::Draft | CaseStatus::NeedsMoreInfo => {
                    self.transition(
                        case,
                        CaseStatus::Submitted,
                        actor,
                        TransitionContext::default(),
                    )
                    .await?;
                }
                // Already on its way through the pipeline
                CaseStatus::Submitted | CaseStatus::Processing => {}
                _ => {
                    tracing::debug!(case_id = %case_id, status = %case.status, "Submit is a no-op");
                    return Ok(case);
                }
            }
        }

        self.process_case(case_id, cancel).await
    }

    fn case_lock(&self, case_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(case_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drive a SUBMITTED (or stuck PROCESSING) case through the decision
    /// pipeline. Serialized per case; the loser of a concurrent call
    /// observes the post-winner state and returns it.
    pub async fn process_case(&self, case_id: &str, cancel: &CancellationToken) -> Result<Case> {
        let lock = self.case_lock(case_id);
        let _guard = lock.lock().await;

        // Re-read after acquiring the lock
        let case = self.get_case(case_id).await?;
        let case = match case.status {
            CaseStatus::Submitted => {
                self.transition(
                    case,
                    CaseStatus::Processing,
                    Actor::system(),
                    TransitionContext::default(),
                )
                .await?
            }
            // Re-drive path (reaper); the transition already happened
            CaseStatus::Processing => case,
            _ => {
                tracing::debug!(
                    case_id = %case_id,
                    status = %case.status,
                    "Case not processable; returning current state"
                );
                return Ok(case);
            }
        };

        match self.run_pipeline(&case, cancel).await {
            Ok(decided) => Ok(decided),
            Err(err) if cancel.is_cancelled() => {
                // Leave the case in PROCESSING; the reaper re-drives it
                tracing::warn!(case_id = %case_id, error = %err, "Processing cancelled");
                self.get_case(case_id).await
            }
            Err(err) => {
                tracing::error!(case_id = %case_id, error = %err, "Processing failed; routing to manual review");

                let event = AuditEvent::new(case_id, "case.processing_failed", Actor::system())
                    .with_policy_version(&case.policy_version)
                    .with_metadata("error", json!(err.to_string()));
                self.audit.append(event).await?;

                let case = self.get_case(case_id).await?;
                self.transition(
                    case,
                    CaseStatus::UnderReview(ReviewStage::ManualReview),
                    Actor::system(),
                    TransitionContext::default(),
                )
                .await
            }
        }
    }

    /// Evidence → agents → ensemble → rules → decision
    async fn run_pipeline(&self, case: &Case, cancel: &CancellationToken) -> Result<Case> {
        let evidence = self.evidence.latest_evidence(&case.case_id).await?;
        if evidence.is_empty() {
            tracing::warn!(
                case_id = %case.case_id,
                "No evidence collected; agents will produce degraded recommendations"
            );
        }

        let recommendations = self
            .orchestrator
            .run_all(&case.case_id, &evidence, cancel)
            .await?;

        let ensemble = self.orchestrator.synthesize(case, &recommendations).await?;

        let policy = self.policy_engine.get_policy(&case.policy_version).await?;
        let rule_match = self
            .policy_engine
            .evaluate_rules(&policy, case, &ensemble, &evidence)
            .await?;

        self.execute_decision(case.clone(), &rule_match, &ensemble)
            .await
    }

    /// Apply a matched rule: terminal transition or routing to human review
    async fn execute_decision(
        &self,
        case: Case,
        rule_match: &RuleMatch,
        ensemble: &EnsembleDecision,
    ) -> Result<Case> {
        let context = TransitionContext {
            ensemble_snapshot: Some(serde_json::to_value(ensemble)?),
            rule_matched: Some(rule_match.rule_name.clone()),
            ..Default::default()
        };

        match rule_match.action {
            ActionType::Approve => {
                self.transition(case, CaseStatus::Approved, Actor::system(), context)
                    .await
            }
            ActionType::Reject => {
                self.transition(case, CaseStatus::Rejected, Actor::system(), context)
                    .await
            }
            // Manual review, escalation and more-info requests all route to
            // the human review queue
            ActionType::ManualReview | ActionType::Escalate | ActionType::RequestMoreInfo => {
                let sla_deadline = rule_match
                    .sla_hours
                    .map(|hours| Utc::now() + ChronoDuration::hours(hours as i64));

                let mut case = self
                    .transition(
                        case,
                        CaseStatus::UnderReview(ReviewStage::ManualReview),
                        Actor::system(),
                        context,
                    )
                    .await?;

                if case.sla_deadline != sla_deadline {
                    case.sla_deadline = sla_deadline;
                    case.updated_at = Utc::now();
                    self.cases.update_case(&case).await?;
                }

                if let Some(role) = &rule_match.assignee_role {
                    let assignment = QueueAssignment::new(
                        &case.case_id,
                        role,
                        case.priority.queue_priority(),
                        sla_deadline,
                    );
                    self.queue.save_assignment(&assignment).await?;

                    tracing::info!(
                        case_id = %case.case_id,
                        queue = %assignment.queue,
                        role = %role,
                        rule = %rule_match.rule_name,
                        "Queue assignment created"
                    );
                }

                Ok(case)
            }
        }
    }

    /// Human review of a case under review
    pub async fn review_case(
        &self,
        case_id: &str,
        decision: ReviewDecision,
        reviewer: Actor,
    ) -> Result<Case> {
        if decision.reasoning.rationale.trim().len() < MIN_RATIONALE_LEN {
            return Err(AppError::Validation(format!(
                "review rationale must be at least {MIN_RATIONALE_LEN} characters"
            )));
        }

        let case = self.get_case(case_id).await?;

        let to_status = match decision.action {
            ActionType::Approve => CaseStatus::Approved,
            ActionType::Reject => CaseStatus::Rejected,
            ActionType::RequestMoreInfo => CaseStatus::NeedsMoreInfo,
            other => {
                return Err(AppError::Validation(format!(
                    "invalid review action: {other}"
                )));
            }
        };

        // Snapshots stored by value on the review event
        let evidence = self.evidence.latest_evidence(case_id).await?;
        let evidence_snapshot: serde_json::Map<String, serde_json::Value> = evidence
            .iter()
            .map(|e| (e.evidence_type.clone(), e.data.clone()))
            .collect();
        let ensemble = self.latest_ensemble(case_id).await?;

        let context = TransitionContext {
            reasoning: Some(decision.reasoning),
            evidence_snapshot: Some(serde_json::Value::Object(evidence_snapshot)),
            ensemble_snapshot: ensemble
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
            rule_matched: None,
        };

        let case = self.transition(case, to_status, reviewer, context).await?;

        self.complete_assignments(case_id).await?;

        Ok(case)
    }

    /// Execute one guarded transition: guard check, audit append, then the
    /// status write. The audit event precedes the write so a crash between
    /// them replays as attempted rather than silently lost.
    async fn transition(
        &self,
        mut case: Case,
        to: CaseStatus,
        actor: Actor,
        context: TransitionContext,
    ) -> Result<Case> {
        let from = case.status;
        let policy = self.policy_engine.get_policy(&case.policy_version).await?;

        if let Err(refusal) =
            self.policy_engine
                .guard_transition(&policy.state_machine, from, to, &actor)
        {
            // Optional info event; the refused transition itself is never
            // recorded as a state_transition
            let event = AuditEvent::new(&case.case_id, "transition.refused", actor.clone())
                .with_metadata("from", json!(from.to_string()))
                .with_metadata("to", json!(to.to_string()));
            self.audit.append(event).await?;
            return Err(refusal);
        }

        let mut event = AuditEvent::new(&case.case_id, "state_transition", actor)
            .with_transition(from, to)
            .with_policy_version(&case.policy_version);
        event.reasoning = context.reasoning;
        event.evidence_snapshot = context.evidence_snapshot;
        event.agent_recommendation = context.ensemble_snapshot;
        event.policy_rule_matched = context.rule_matched;
        self.audit.append(event).await?;

        case.status = to;
        case.updated_at = Utc::now();
        if to.is_terminal() {
            case.sla_deadline = None;
        }
        self.cases.update_case(&case).await?;

        tracing::info!(
            case_id = %case.case_id,
            from = %from,
            to = %to,
            "Case transitioned"
        );
        Ok(case)
    }

    /// Push typed evidence onto a case (the evidence-collector interface)
    pub async fn add_evidence(
        &self,
        case_id: &str,
        evidence_type: &str,
        data: serde_json::Value,
    ) -> Result<Evidence> {
        let case = self.get_case(case_id).await?;

        let evidence = self
            .evidence
            .save_evidence(Evidence::new(&case.case_id, evidence_type, data))
            .await?;

        let event = AuditEvent::new(case_id, "evidence.added", Actor::api())
            .with_metadata("evidence_type", json!(evidence.evidence_type))
            .with_metadata("version", json!(evidence.version));
        self.audit.append(event).await?;

        Ok(evidence)
    }

    pub async fn get_case(&self, case_id: &str) -> Result<Case> {
        self.cases
            .get_case(case_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Case {case_id} not found")))
    }

    pub async fn get_case_with_details(&self, case_id: &str) -> Result<CaseDetails> {
        let case = self.get_case(case_id).await?;
        let documents = self.documents.list_documents(case_id).await?;
        let evidence = self.evidence.latest_evidence(case_id).await?;
        let ensemble = self.latest_ensemble(case_id).await?;

        Ok(CaseDetails {
            case,
            documents,
            evidence,
            ensemble,
        })
    }

    pub async fn list_cases(
        &self,
        filter: &CaseFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Case>> {
        self.cases.list_cases(filter, limit, offset).await
    }

    async fn latest_ensemble(&self, case_id: &str) -> Result<Option<EnsembleDecision>> {
        self.recommendations.latest_ensemble(case_id).await
    }

    /// Mark open queue assignments for a case as completed
    async fn complete_assignments(&self, case_id: &str) -> Result<()> {
        for mut assignment in self.queue.case_assignments(case_id).await? {
            if assignment.completed_at.is_none() {
                assignment.completed_at = Some(Utc::now());
                self.queue.update_assignment(&assignment).await?;
            }
        }
        Ok(())
    }

    /// Background sweep: re-drive stuck PROCESSING cases and expire cases
    /// whose SLA deadline has passed.
    pub async fn reap_once(&self, stuck_timeout_secs: u64) -> Result<()> {
        let cutoff = Utc::now() - ChronoDuration::seconds(stuck_timeout_secs as i64);

        let stuck = self
            .cases
            .list_cases(
                &CaseFilter {
                    status: Some(CaseStatus::Processing),
                    ..Default::default()
                },
                10_000,
                0,
            )
            .await?;

        for case in stuck {
            if case.updated_at < cutoff {
                tracing::warn!(case_id = %case.case_id, "Re-driving stuck PROCESSING case");
                let cancel = CancellationToken::new();
                if let Err(err) = self.process_case(&case.case_id, &cancel).await {
                    tracing::error!(case_id = %case.case_id, error = %err, "Re-drive failed");
                }
            }
        }

        let all = self.cases.list_cases(&CaseFilter::default(), 10_000, 0).await?;
        for case in all {
            let overdue = case
                .sla_deadline
                .map(|deadline| deadline < Utc::now())
                .unwrap_or(false);
            if overdue && !case.is_terminal() && case.status != CaseStatus::Processing {
                tracing::warn!(case_id = %case.case_id, "SLA deadline passed; expiring case");
                if let Err(err) = self
                    .transition(
                        case.clone(),
                        CaseStatus::Expired,
                        Actor::system(),
                        TransitionContext::default(),
                    )
                    .await
                {
                    tracing::error!(case_id = %case.case_id, error = %err, "Expiry failed");
                }
            }
        }

        Ok(())
    }

    /// Periodic reaper loop; runs until the token is cancelled
    pub async fn run_reaper(
        self: Arc<Self>,
        interval_secs: u64,
        stuck_timeout_secs: u64,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.reap_once(stuck_timeout_secs).await {
                        tracing::error!(error = %err, "Reaper sweep failed");
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Reaper stopped");
                    return;
                }
            }
        }
    }
}

#[derive(Default)]
struct TransitionContext {
    reasoning: Option<ReviewReasoning>,
    evidence_snapshot: Option<serde_json::Value>,
    ensemble_snapshot: Option<serde_json::Value>,
    rule_matched: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRegistry;
    use crate::audit::InMemoryAuditLog;
    use crate::models::default_kyc_policy;
    use crate::state::InMemoryStore;
    use serde_json::json;

    async fn build_service(
        registry: AgentRegistry,
    ) -> (Arc<CaseService>, Arc<InMemoryStore>, Arc<InMemoryAuditLog>) {
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
        (service, store, audit)
    }

    fn kyc_input() -> CreateCaseInput {
        CreateCaseInput {
            vertical: "kyc".to_string(),
            priority: CasePriority::Normal,
            customer_id: Some("cust_1".to_string()),
            metadata: HashMap::new(),
        }
    }

    async fn seed_clean_evidence(service: &CaseService, case_id: &str) {
        service
            .add_evidence(
                case_id,
                "identity",
                json!({
                    "verified": true,
                    "confidence": 0.97,
                    "extracted_fields": {
                        "full_name": "John Doe",
                        "date_of_birth": "1985-03-15",
                        "id_number": "D1234567",
                        "expiry_date": "2030-01-01"
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
                    "sanctions_screening": {"status": "clear", "checked_lists": ["OFAC", "UN", "EU"]},
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

    #[tokio::test]
    async fn test_create_case_binds_active_policy() {
        let (service, _, audit) = build_service(AgentRegistry::with_default_agents()).await;

        let case = service.create_case(kyc_input(), Actor::api()).await.unwrap();
        assert_eq!(case.status, CaseStatus::Draft);
        assert_eq!(case.policy_version, "pol_kyc_v1");
        assert!(case.updated_at >= case.created_at);

        let history = audit.case_history(&case.case_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, "case.created");
    }

    #[tokio::test]
    async fn test_create_case_without_active_policy_conflicts() {
        let (service, _, _) = build_service(AgentRegistry::with_default_agents()).await;

        let mut input = kyc_input();
        input.vertical = "insurance".to_string();

        let err = service.create_case(input, Actor::api()).await.unwrap_err();
        assert_eq!(err.error_code(), "CONFLICT");
    }

    #[tokio::test]
    async fn test_clean_case_auto_approves() {
        let (service, _, audit) = build_service(AgentRegistry::with_default_agents()).await;

        let case = service.create_case(kyc_input(), Actor::api()).await.unwrap();
        seed_clean_evidence(&service, &case.case_id).await;

        let decided = service
            .submit_case(&case.case_id, Actor::api(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(decided.status, CaseStatus::Approved);
        assert_eq!(decided.sla_deadline, None);
        assert_eq!(decided.policy_version, "pol_kyc_v1");

        let history = audit.case_history(&case.case_id).await.unwrap();
        let types: Vec<&str> = history.iter().map(|e| e.event_type.as_str()).collect();
        // created + 4 evidence + submitted + processing + ensemble + approved
        assert!(types.contains(&"case.created"));
        assert!(types.contains(&"ensemble.stored"));
        let transitions: Vec<_> = history
            .iter()
            .filter(|e| e.event_type == "state_transition")
            .collect();
        assert_eq!(transitions.len(), 3);
        assert_eq!(
            transitions.last().unwrap().transition.as_ref().unwrap().to,
            "approved"
        );
        assert_eq!(
            transitions.last().unwrap().policy_rule_matched.as_deref(),
            Some("High Confidence Auto-Approve")
        );
    }

    #[tokio::test]
    async fn test_submit_is_idempotent() {
        let (service, _, _) = build_service(AgentRegistry::with_default_agents()).await;

        let case = service.create_case(kyc_input(), Actor::api()).await.unwrap();
        seed_clean_evidence(&service, &case.case_id).await;

        let first = service
            .submit_case(&case.case_id, Actor::api(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.status, CaseStatus::Approved);

        // Second submission is a no-op that returns the current state
        let second = service
            .submit_case(&case.case_id, Actor::api(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.status, CaseStatus::Approved);
        assert_eq!(second.updated_at, first.updated_at);
    }

    #[tokio::test]
    async fn test_sanctions_hit_routes_to_review_queue() {
        let (service, store, _) = build_service(AgentRegistry::with_default_agents()).await;

        let case = service.create_case(kyc_input(), Actor::api()).await.unwrap();
        seed_clean_evidence(&service, &case.case_id).await;
        // Newer compliance version supersedes the clear one
        service
            .add_evidence(
                &case.case_id,
                "compliance",
                json!({
                    "sanctions_screening": {"status": "hit", "checked_lists": ["OFAC", "UN"]},
                    "pep_screening": {"status": "clear"}
                }),
            )
            .await
            .unwrap();

        let before = Utc::now();
        let decided = service
            .submit_case(&case.case_id, Actor::api(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            decided.status,
            CaseStatus::UnderReview(ReviewStage::ManualReview)
        );

        let assignments = store.case_assignments(&case.case_id).await.unwrap();
        assert_eq!(assignments.len(), 1);
        let assignment = &assignments[0];
        assert_eq!(assignment.assigned_role, "senior_compliance_officer");
        assert_eq!(assignment.queue, "queue_senior_compliance_officer");

        // SLA of two hours from the decision
        let sla = assignment.sla_deadline.unwrap();
        assert!(sla > before + ChronoDuration::minutes(119));
        assert!(sla < before + ChronoDuration::minutes(121));
        assert_eq!(decided.sla_deadline, assignment.sla_deadline);
    }

    #[tokio::test]
    async fn test_review_on_draft_is_refused() {
        let (service, _, audit) = build_service(AgentRegistry::with_default_agents()).await;

        let case = service.create_case(kyc_input(), Actor::api()).await.unwrap();

        let err = service
            .review_case(
                &case.case_id,
                ReviewDecision {
                    action: ActionType::Approve,
                    reasoning: ReviewReasoning {
                        rationale: "Manually verified all identity documents against the source registry records."
                            .to_string(),
                        structured_checks: HashMap::new(),
                    },
                },
                Actor::human("usr_1", "reviewer"),
            )
            .await
            .unwrap_err();

        match err {
            AppError::StateRefused { from, to, .. } => {
                assert_eq!(from, "draft");
                assert_eq!(to, "approved");
            }
            other => panic!("expected StateRefused, got {other:?}"),
        }

        // Case unchanged; no state_transition event was recorded
        let unchanged = service.get_case(&case.case_id).await.unwrap();
        assert_eq!(unchanged.status, CaseStatus::Draft);
        let history = audit.case_history(&case.case_id).await.unwrap();
        assert!(history.iter().all(|e| e.event_type != "state_transition"));
        assert!(history.iter().any(|e| e.event_type == "transition.refused"));
    }

    #[tokio::test]
    async fn test_review_requires_substantive_rationale() {
        let (service, _, _) = build_service(AgentRegistry::with_default_agents()).await;
        let case = service.create_case(kyc_input(), Actor::api()).await.unwrap();

        let err = service
            .review_case(
                &case.case_id,
                ReviewDecision {
                    action: ActionType::Approve,
                    reasoning: ReviewReasoning {
                        rationale: "ok".to_string(),
                        structured_checks: HashMap::new(),
                    },
                },
                Actor::human("usr_1", "reviewer"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_human_review_approves_with_snapshots() {
        let (service, store, audit) = build_service(AgentRegistry::with_default_agents()).await;

        let case = service.create_case(kyc_input(), Actor::api()).await.unwrap();
        seed_clean_evidence(&service, &case.case_id).await;
        service
            .add_evidence(
                &case.case_id,
                "compliance",
                json!({"sanctions_screening": {"status": "potential_match"}}),
            )
            .await
            .unwrap();

        let under_review = service
            .submit_case(&case.case_id, Actor::api(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            under_review.status,
            CaseStatus::UnderReview(ReviewStage::ManualReview)
        );

        let reviewed = service
            .review_case(
                &case.case_id,
                ReviewDecision {
                    action: ActionType::Approve,
                    reasoning: ReviewReasoning {
                        rationale: "Cleared the potential sanctions match against the primary source; name differs in both date of birth and nationality."
                            .to_string(),
                        structured_checks: HashMap::new(),
                    },
                },
                Actor::human("usr_1", "reviewer"),
            )
            .await
            .unwrap();

        assert_eq!(reviewed.status, CaseStatus::Approved);
        assert_eq!(reviewed.sla_deadline, None);

        let history = audit.case_history(&case.case_id).await.unwrap();
        let review_event = history
            .iter()
            .filter(|e| e.event_type == "state_transition")
            .last()
            .unwrap();
        assert!(review_event.reasoning.is_some());
        assert!(review_event.evidence_snapshot.is_some());
        assert!(review_event.agent_recommendation.is_some());

        // Queue assignment closed out
        let assignments = store.case_assignments(&case.case_id).await.unwrap();
        assert!(assignments.iter().all(|a| a.completed_at.is_some()));
    }

    #[tokio::test]
    async fn test_processing_failure_routes_to_manual_review() {
        // An empty registry makes ensemble synthesis fail inside Process
        let (service, _, audit) = build_service(AgentRegistry::new()).await;

        let case = service.create_case(kyc_input(), Actor::api()).await.unwrap();
        let decided = service
            .submit_case(&case.case_id, Actor::api(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            decided.status,
            CaseStatus::UnderReview(ReviewStage::ManualReview)
        );

        let history = audit.case_history(&case.case_id).await.unwrap();
        assert!(history
            .iter()
            .any(|e| e.event_type == "case.processing_failed"));
    }

    #[tokio::test]
    async fn test_reaper_expires_overdue_cases() {
        let (service, store, _) = build_service(AgentRegistry::with_default_agents()).await;

        let case = service.create_case(kyc_input(), Actor::api()).await.unwrap();
        seed_clean_evidence(&service, &case.case_id).await;
        service
            .add_evidence(
                &case.case_id,
                "compliance",
                json!({"sanctions_screening": {"status": "potential_match"}}),
            )
            .await
            .unwrap();

        let under_review = service
            .submit_case(&case.case_id, Actor::api(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(under_review.sla_deadline.is_some());

        // Force the deadline into the past
        let mut overdue = under_review.clone();
        overdue.sla_deadline = Some(Utc::now() - ChronoDuration::hours(1));
        store.update_case(&overdue).await.unwrap();

        service.reap_once(300).await.unwrap();

        let expired = service.get_case(&case.case_id).await.unwrap();
        assert_eq!(expired.status, CaseStatus::Expired);
        assert_eq!(expired.sla_deadline, None);
    }

    #[tokio::test]
    async fn test_case_details_include_related_records() {
        let (service, _, _) = build_service(AgentRegistry::with_default_agents()).await;

        let case = service.create_case(kyc_input(), Actor::api()).await.unwrap();
        seed_clean_evidence(&service, &case.case_id).await;
        service
            .submit_case(&case.case_id, Actor::api(), &CancellationToken::new())
            .await
            .unwrap();

        let details = service.get_case_with_details(&case.case_id).await.unwrap();
        assert_eq!(details.evidence.len(), 4);
        assert!(details.ensemble.is_some());
        assert_eq!(details.case.status, CaseStatus::Approved);
    }
}
