pub mod voting;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::agents::AgentRegistry;
use crate::audit::AuditLog;
use crate::error::{AppError, Result};
use crate::models::{
    Actor, AgentRecommendation, AuditEvent, Case, EnsembleDecision, Evidence, Recommendation,
};
use crate::policy::PolicyEngine;
use crate::state::RecommendationStore;

/// Fans evidence out to all registered agents concurrently and synthesizes
/// their recommendations into an ensemble decision.
pub struct AgentOrchestrator {
    registry: AgentRegistry,
    store: Arc<dyn RecommendationStore>,
    policy_engine: Arc<PolicyEngine>,
    audit: Arc<dyn AuditLog>,
    agent_timeout: Duration,
}

impl AgentOrchestrator {
    pub fn new(
        registry: AgentRegistry,
        store: Arc<dyn RecommendationStore>,
        policy_engine: Arc<PolicyEngine>,
        audit: Arc<dyn AuditLog>,
        agent_timeout_secs: u64,
    ) -> Self {
        Self {
            registry,
            store,
            policy_engine,
            audit,
            agent_timeout: Duration::from_secs(agent_timeout_secs),
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Run every registered agent concurrently over an immutable evidence
    /// snapshot.
    ///
    /// Per-agent failures (error, panic, timeout) never abort the others:
    /// the failing agent is substituted with a degraded MANUAL_REVIEW
    /// recommendation and an `agent.error` audit event. Results come back in
    /// registry order and every recommendation is persisted before return.
    pub async fn run_all(
        &self,
        case_id: &str,
        evidence: &[Evidence],
        cancel: &CancellationToken,
    ) -> Result<Vec<AgentRecommendation>> {
        let evidence: Arc<Vec<Evidence>> = Arc::new(evidence.to_vec());

        tracing::info!(
            case_id = %case_id,
            agents = self.registry.len(),
            evidence_items = evidence.len(),
            "Running agent fan-out"
        );

        let mut handles = Vec::with_capacity(self.registry.len());
        for agent in self.registry.agents() {
            let agent = agent.clone();
            let evidence = evidence.clone();
            let budget = self.agent_timeout;
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                let outcome = tokio::select! {
                    result = timeout(budget, agent.analyze(&evidence)) => result,
                    _ = cancel.cancelled() => {
                        return (agent.name().to_string(), agent.version().to_string(), Err(AgentFailure::Cancelled), 0);
                    }
                };
                let elapsed_ms = started.elapsed().as_millis() as u64;

                let result = match outcome {
                    Ok(Ok(recommendation)) => Ok(recommendation),
                    Ok(Err(err)) => Err(AgentFailure::Error(err.to_string())),
                    Err(_) => Err(AgentFailure::Timeout),
                };
                (agent.name().to_string(), agent.version().to_string(), result, elapsed_ms)
            }));
        }

        let joined = futures::future::join_all(handles).await;

        if cancel.is_cancelled() {
            tracing::warn!(case_id = %case_id, "Agent fan-out cancelled; persisting nothing");
            return Err(AppError::Timeout(format!(
                "processing cancelled for case {case_id}"
            )));
        }

        let mut recommendations = Vec::with_capacity(joined.len());
        for (index, join_result) in joined.into_iter().enumerate() {
            let agent = &self.registry.agents()[index];

            let recommendation = match join_result {
                Ok((name, version, Ok(mut recommendation), elapsed_ms)) => {
                    // Clamp any overflowing agent-reported risk
                    recommendation.risk_score = recommendation.risk_score.map(|r| r.min(100));
                    AgentRecommendation::new(case_id, name, version, recommendation, elapsed_ms)
                }
                Ok((name, version, Err(failure), elapsed_ms)) => {
                    self.record_agent_failure(case_id, &name, &failure).await?;
                    AgentRecommendation::new(
                        case_id,
                        name.clone(),
                        version,
                        Recommendation::degraded(&name),
                        elapsed_ms,
                    )
                }
                Err(join_error) => {
                    // A panicking agent reaches here via the task JoinError
                    let name = agent.name().to_string();
                    let failure = AgentFailure::Error(format!("panic: {join_error}"));
                    self.record_agent_failure(case_id, &name, &failure).await?;
                    AgentRecommendation::new(
                        case_id,
                        name.clone(),
                        agent.version().to_string(),
                        Recommendation::degraded(&name),
                        0,
                    )
                }
            };

            self.store.save_recommendation(&recommendation).await?;
            recommendations.push(recommendation);
        }

        Ok(recommendations)
    }

    /// Combine recommendations into an ensemble decision using the strategy
    /// of the case's bound policy; persists the decision and audits it.
    pub async fn synthesize(
        &self,
        case: &Case,
        recommendations: &[AgentRecommendation],
    ) -> Result<EnsembleDecision> {
        let policy = self.policy_engine.get_policy(&case.policy_version).await?;

        let strategy = policy.voting_strategy.strategy;
        let (votes, final_recommendation) =
            voting::vote(strategy, &policy.voting_strategy.config, recommendations)?;

        let decision = EnsembleDecision::new(
            &case.case_id,
            strategy.to_string(),
            votes,
            final_recommendation,
        );
        let decision = self.store.save_ensemble(decision).await?;

        tracing::info!(
            case_id = %case.case_id,
            strategy = %decision.voting_strategy,
            action = %decision.final_recommendation.action,
            confidence = decision.final_recommendation.confidence,
            risk_score = decision.final_recommendation.risk_score,
            attempt = decision.attempt,
            "Ensemble decision synthesized"
        );

        let mut event = AuditEvent::new(&case.case_id, "ensemble.stored", Actor::system())
            .with_policy_version(&case.policy_version);
        event.agent_recommendation = Some(serde_json::to_value(&decision)?);
        self.audit.append(event).await?;

        Ok(decision)
    }

    async fn record_agent_failure(
        &self,
        case_id: &str,
        agent_name: &str,
        failure: &AgentFailure,
    ) -> Result<()> {
        tracing::error!(
            case_id = %case_id,
            agent = %agent_name,
            failure = %failure,
            "Agent failed; substituting degraded recommendation"
        );

        let event = AuditEvent::new(case_id, "agent.error", Actor::system())
            .with_metadata("agent", serde_json::json!(agent_name))
            .with_metadata("failure", serde_json::json!(failure.to_string()));
        self.audit.append(event).await?;
        Ok(())
    }
}

#[derive(Debug)]
enum AgentFailure {
    Error(String),
    Timeout,
    Cancelled,
}

impl std::fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentFailure::Error(message) => write!(f, "{message}"),
            AgentFailure::Timeout => write!(f, "wall-clock budget exceeded"),
            AgentFailure::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Agent;
    use crate::audit::InMemoryAuditLog;
    use crate::models::{default_kyc_policy, ActionType, CasePriority};
    use crate::state::{InMemoryStore, RecommendationStore as _};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    struct PanickingAgent;

    #[async_trait]
    impl Agent for PanickingAgent {
        fn name(&self) -> &str {
            "panicking_agent"
        }

        async fn analyze(&self, _evidence: &[Evidence]) -> Result<Recommendation> {
            panic!("injected failure");
        }
    }

    struct SlowAgent;

    #[async_trait]
    impl Agent for SlowAgent {
        fn name(&self) -> &str {
            "slow_agent"
        }

        async fn analyze(&self, _evidence: &[Evidence]) -> Result<Recommendation> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Recommendation::new(ActionType::Approve, 1.0, "too late"))
        }
    }

    async fn orchestrator_with(registry: AgentRegistry) -> (AgentOrchestrator, Arc<InMemoryStore>, Arc<InMemoryAuditLog>) {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let engine = Arc::new(PolicyEngine::new(store.clone(), audit.clone(), 60));
        engine.publish_policy(default_kyc_policy()).await.unwrap();
        (
            AgentOrchestrator::new(registry, store.clone(), engine, audit.clone(), 1),
            store,
            audit,
        )
    }

    fn clean_evidence() -> Vec<Evidence> {
        vec![
            Evidence::new(
                "case_1",
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
            ),
            Evidence::new("case_1", "address", json!({"verified": true})),
            Evidence::new(
                "case_1",
                "compliance",
                json!({
                    "sanctions_screening": {"status": "clear", "checked_lists": ["OFAC", "UN"]},
                    "pep_screening": {"status": "clear"}
                }),
            ),
            Evidence::new("case_1", "risk_assessment", json!({"risk_score": 10})),
        ]
    }

    #[tokio::test]
    async fn test_run_all_returns_registry_order() {
        let (orchestrator, store, _) =
            orchestrator_with(AgentRegistry::with_default_agents()).await;

        let recs = orchestrator
            .run_all("case_1", &clean_evidence(), &CancellationToken::new())
            .await
            .unwrap();

        let names: Vec<&str> = recs.iter().map(|r| r.agent_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["identity_agent", "fraud_agent", "compliance_agent", "risk_agent"]
        );
        assert!(recs
            .iter()
            .all(|r| r.recommendation.action == ActionType::Approve));

        // Every recommendation persisted
        let stored = store.list_recommendations("case_1").await.unwrap();
        assert_eq!(stored.len(), 4);
    }

    #[tokio::test]
    async fn test_panicking_agent_is_isolated() {
        let mut registry = AgentRegistry::with_default_agents();
        registry.register(Arc::new(PanickingAgent));

        let (orchestrator, _, audit) = orchestrator_with(registry).await;

        let recs = orchestrator
            .run_all("case_1", &clean_evidence(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(recs.len(), 5);
        let degraded = recs
            .iter()
            .find(|r| r.agent_name == "panicking_agent")
            .unwrap();
        assert_eq!(degraded.recommendation.action, ActionType::ManualReview);
        assert_eq!(degraded.recommendation.confidence, 0.0);
        assert_eq!(degraded.recommendation.risk_score, Some(100));
        assert!(degraded
            .recommendation
            .risk_flags
            .contains(&"agent_error".to_string()));

        // Other agents unaffected
        assert!(recs
            .iter()
            .filter(|r| r.agent_name != "panicking_agent")
            .all(|r| r.recommendation.action == ActionType::Approve));

        let history = audit.case_history("case_1").await.unwrap();
        assert!(history.iter().any(|e| e.event_type == "agent.error"));
    }

    #[tokio::test]
    async fn test_timed_out_agent_is_substituted() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(SlowAgent));

        let (orchestrator, _, audit) = orchestrator_with(registry).await;

        let recs = orchestrator
            .run_all("case_1", &[], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].recommendation.action, ActionType::ManualReview);
        assert!(recs[0]
            .recommendation
            .risk_flags
            .contains(&"agent_error".to_string()));

        let history = audit.case_history("case_1").await.unwrap();
        assert!(history.iter().any(|e| e.event_type == "agent.error"));
    }

    #[tokio::test]
    async fn test_cancellation_persists_nothing() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(SlowAgent));

        let (orchestrator, store, _) = orchestrator_with(registry).await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orchestrator.run_all("case_1", &[], &cancel).await;
        assert!(result.is_err());

        let stored = store.list_recommendations("case_1").await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_synthesize_persists_and_audits() {
        let (orchestrator, store, audit) =
            orchestrator_with(AgentRegistry::with_default_agents()).await;

        let case = Case::new(
            "kyc".to_string(),
            CasePriority::Normal,
            "pol_kyc_v1".to_string(),
            None,
            HashMap::new(),
        );

        let recs = orchestrator
            .run_all(&case.case_id, &clean_evidence(), &CancellationToken::new())
            .await
            .unwrap();

        let decision = orchestrator.synthesize(&case, &recs).await.unwrap();
        assert_eq!(decision.voting_strategy, "risk_weighted");
        assert_eq!(decision.final_recommendation.action, ActionType::Approve);
        assert_eq!(decision.attempt, 1);

        let stored = store.latest_ensemble(&case.case_id).await.unwrap().unwrap();
        assert_eq!(stored.ensemble_id, decision.ensemble_id);

        let history = audit.case_history(&case.case_id).await.unwrap();
        let ensemble_event = history
            .iter()
            .find(|e| e.event_type == "ensemble.stored")
            .unwrap();
        // Snapshot stored by value
        assert!(ensemble_event.agent_recommendation.is_some());
    }
}
