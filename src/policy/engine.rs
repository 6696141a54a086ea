use dashmap::DashMap;
use moka::future::Cache;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditLog;
use crate::error::{AppError, Result};
use crate::models::{
    Actor, ActorType, AuditEvent, Case, CaseStatus, EnsembleDecision, Evidence, Policy, PolicyRule,
    StateMachine, TransitionPattern,
};
use crate::policy::dsl::{self, Expr};
use crate::state::PolicyStore;

/// Result of policy rule evaluation: the first rule whose condition held
#[derive(Debug, Clone, Serialize)]
pub struct RuleMatch {
    pub rule_name: String,
    pub priority: i32,
    pub action: crate::models::ActionType,
    pub assignee_role: Option<String>,
    pub sla_hours: Option<u32>,
    pub mandatory_reasoning: bool,
}

impl RuleMatch {
    fn from_rule(rule: &PolicyRule) -> Self {
        Self {
            rule_name: rule.name.clone(),
            priority: rule.priority,
            action: rule.action,
            assignee_role: rule.assignee_role.clone(),
            sla_hours: rule.sla_hours,
            mandatory_reasoning: rule.mandatory_reasoning,
        }
    }
}

/// What-if outcome of applying another policy to an existing ensemble
#[derive(Debug, Clone, Serialize)]
pub struct PolicySimulation {
    pub case_id: String,
    pub bound_policy_id: String,
    pub bound_outcome: RuleMatch,
    pub simulated_policy_id: String,
    pub simulated_outcome: RuleMatch,
    pub outcome_changed: bool,
}

/// A rule with its condition parsed at policy load time
struct CompiledRule {
    rule: PolicyRule,
    condition: Expr,
}

/// Policy management, rule evaluation and the state-machine transition guard
pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
    audit: Arc<dyn AuditLog>,

    /// Read-mostly policy caches with TTL; invalidated on publish
    by_id: Cache<String, Arc<Policy>>,
    by_vertical: Cache<String, Arc<Policy>>,

    /// Parsed rule conditions keyed by policy id
    compiled: DashMap<String, Arc<Vec<CompiledRule>>>,
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn PolicyStore>, audit: Arc<dyn AuditLog>, cache_ttl_secs: u64) -> Self {
        Self {
            store,
            audit,
            by_id: Cache::builder()
                .time_to_live(Duration::from_secs(cache_ttl_secs))
                .build(),
            by_vertical: Cache::builder()
                .time_to_live(Duration::from_secs(cache_ttl_secs))
                .build(),
            compiled: DashMap::new(),
        }
    }

    /// Validate, compile and persist a policy; refreshes the caches
    pub async fn publish_policy(&self, policy: Policy) -> Result<()> {
        policy.validate()?;
        let compiled = Self::compile_rules(&policy)?;

        self.store.save_policy(&policy).await?;

        self.compiled
            .insert(policy.policy_id.clone(), Arc::new(compiled));
        self.by_id.invalidate(&policy.policy_id).await;
        self.by_vertical.invalidate(&policy.vertical).await;

        tracing::info!(
            policy_id = %policy.policy_id,
            vertical = %policy.vertical,
            active = policy.active,
            rules = policy.rules.len(),
            "Policy published"
        );
        Ok(())
    }

    /// Get a policy by id (cached)
    pub async fn get_policy(&self, policy_id: &str) -> Result<Arc<Policy>> {
        if let Some(policy) = self.by_id.get(policy_id).await {
            return Ok(policy);
        }

        let policy = self
            .store
            .get_policy(policy_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Policy {policy_id} not found")))?;

        let policy = Arc::new(policy);
        self.by_id
            .insert(policy_id.to_string(), policy.clone())
            .await;
        Ok(policy)
    }

    /// Get the active policy for a vertical (cached)
    pub async fn active_policy(&self, vertical: &str) -> Result<Arc<Policy>> {
        if let Some(policy) = self.by_vertical.get(vertical).await {
            return Ok(policy);
        }

        let policy = self.store.active_policy(vertical).await?.ok_or_else(|| {
            AppError::Conflict(format!("No active policy for vertical '{vertical}'"))
        })?;

        let policy = Arc::new(policy);
        self.by_vertical
            .insert(vertical.to_string(), policy.clone())
            .await;
        Ok(policy)
    }

    pub async fn list_policies(&self) -> Result<Vec<Policy>> {
        self.store.list_policies().await
    }

    /// Evaluate policy rules against case + ensemble; first match by priority
    /// ascending wins. A rule whose condition fails to evaluate is audited as
    /// `rule_eval_error`, treated as false, and evaluation continues.
    pub async fn evaluate_rules(
        &self,
        policy: &Policy,
        case: &Case,
        ensemble: &EnsembleDecision,
        evidence: &[Evidence],
    ) -> Result<RuleMatch> {
        let compiled = self.compiled_rules(policy)?;
        let context = build_eval_context(case, ensemble, evidence);

        for entry in compiled.iter() {
            match dsl::evaluate(&entry.condition, &context) {
                Ok(true) => {
                    tracing::info!(
                        case_id = %case.case_id,
                        policy_id = %policy.policy_id,
                        rule = %entry.rule.name,
                        priority = entry.rule.priority,
                        action = %entry.rule.action,
                        "Policy rule matched"
                    );
                    return Ok(RuleMatch::from_rule(&entry.rule));
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(
                        case_id = %case.case_id,
                        rule = %entry.rule.name,
                        error = %err,
                        "Rule condition failed to evaluate; treating as false"
                    );
                    let event = AuditEvent::new(&case.case_id, "rule_eval_error", Actor::system())
                        .with_policy_version(&policy.policy_id)
                        .with_metadata("rule", json!(entry.rule.name))
                        .with_metadata("error", json!(err.to_string()));
                    self.audit.append(event).await?;
                }
            }
        }

        // Unreachable for validated policies, which must carry a '*' rule
        Err(AppError::PolicyConfig(format!(
            "policy {} matched no rule for case {}",
            policy.policy_id, case.case_id
        )))
    }

    /// Check the transition guard, returning StateRefused when not allowed.
    ///
    /// Matching precedence: exact `from → to`, then substate wildcard
    /// (`from.* → to` / `from → to.*`), then `from → *`, then `* → to`.
    pub fn guard_transition(
        &self,
        state_machine: &StateMachine,
        from: CaseStatus,
        to: CaseStatus,
        actor: &Actor,
    ) -> Result<()> {
        let from_name = from.to_string();
        let to_name = to.to_string();

        let matched = best_transition_match(state_machine, &from_name, &to_name);

        let Some((_, allowed_actors)) = matched else {
            return Err(AppError::StateRefused {
                from: from_name,
                to: to_name,
                actor: actor.describe(),
                required_actors: Vec::new(),
            });
        };

        let names = actor_guard_names(actor);
        if allowed_actors.iter().any(|a| names.contains(a)) {
            Ok(())
        } else {
            Err(AppError::StateRefused {
                from: from_name,
                to: to_name,
                actor: actor.describe(),
                required_actors: allowed_actors.clone(),
            })
        }
    }

    /// Re-run another policy's rules against a case's stored ensemble
    pub async fn simulate(
        &self,
        simulated_policy_id: &str,
        case: &Case,
        ensemble: &EnsembleDecision,
        evidence: &[Evidence],
    ) -> Result<PolicySimulation> {
        let bound = self.get_policy(&case.policy_version).await?;
        let simulated = self.get_policy(simulated_policy_id).await?;

        let bound_outcome = self.evaluate_rules(&bound, case, ensemble, evidence).await?;
        let simulated_outcome = self
            .evaluate_rules(&simulated, case, ensemble, evidence)
            .await?;

        let outcome_changed = bound_outcome.action != simulated_outcome.action
            || bound_outcome.rule_name != simulated_outcome.rule_name;

        Ok(PolicySimulation {
            case_id: case.case_id.clone(),
            bound_policy_id: bound.policy_id.clone(),
            bound_outcome,
            simulated_policy_id: simulated.policy_id.clone(),
            simulated_outcome,
            outcome_changed,
        })
    }

    fn compiled_rules(&self, policy: &Policy) -> Result<Arc<Vec<CompiledRule>>> {
        if let Some(compiled) = self.compiled.get(&policy.policy_id) {
            return Ok(compiled.clone());
        }
        let compiled = Arc::new(Self::compile_rules(policy)?);
        self.compiled
            .insert(policy.policy_id.clone(), compiled.clone());
        Ok(compiled)
    }

    /// Parse every condition once, in priority order
    fn compile_rules(policy: &Policy) -> Result<Vec<CompiledRule>> {
        policy
            .sorted_rules()
            .into_iter()
            .map(|rule| {
                let condition = dsl::parse(&rule.condition).map_err(|err| {
                    AppError::PolicyConfig(format!(
                        "policy {} rule '{}': {err}",
                        policy.policy_id, rule.name
                    ))
                })?;
                Ok(CompiledRule {
                    rule: rule.clone(),
                    condition,
                })
            })
            .collect()
    }
}

/// Map an actor onto the names used in state-machine actor lists
fn actor_guard_names(actor: &Actor) -> Vec<String> {
    match actor.actor_type {
        ActorType::System => vec!["system".to_string(), "workflow_engine".to_string()],
        ActorType::Api => vec!["api".to_string()],
        ActorType::Human => vec![actor.role.clone().unwrap_or_else(|| "reviewer".to_string())],
    }
}

/// Find the best-precedence transition entry matching `(from, to)`
fn best_transition_match<'a>(
    state_machine: &'a StateMachine,
    from: &str,
    to: &str,
) -> Option<(u8, &'a Vec<String>)> {
    let mut best: Option<(u8, &String, &'a Vec<String>)> = None;

    for (key, spec) in &state_machine.transitions {
        let Some(pattern) = TransitionPattern::parse(key) else {
            continue;
        };
        if !pattern.from.matches(from) || !pattern.to.matches(to) {
            continue;
        }

        let rank = if pattern.from.is_exact() && pattern.to.is_exact() {
            0
        } else if pattern.from.is_substate() || pattern.to.is_substate() {
            1
        } else if pattern.to.is_any() {
            2 // from → *
        } else {
            3 // * → to
        };

        let better = match &best {
            None => true,
            // Key ordering breaks rank ties deterministically
            Some((best_rank, best_key, _)) => {
                rank < *best_rank || (rank == *best_rank && key < *best_key)
            }
        };
        if better {
            best = Some((rank, key, &spec.allowed_actors));
        }
    }

    best.map(|(rank, _, actors)| (rank, actors))
}

/// Build the nested rule-evaluation context from case, ensemble and the
/// latest evidence per type
pub fn build_eval_context(case: &Case, ensemble: &EnsembleDecision, evidence: &[Evidence]) -> Value {
    let final_rec = &ensemble.final_recommendation;
    let mut context = json!({
        "case": {
            "priority": case.priority.to_string(),
            "vertical": case.vertical,
            "status": case.status.to_string(),
        },
        "ensemble": {
            "confidence": final_rec.confidence,
            "risk_score": final_rec.risk_score,
            "risk_flags": final_rec.risk_flags,
            "action": final_rec.action.to_string(),
        },
    });

    for item in evidence {
        context[item.evidence_type.clone()] = item.data.clone();
    }

    context
}
