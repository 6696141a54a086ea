use crate::error::{AppError, Result};
use crate::models::{
    AgentRecommendation, Case, Document, EnsembleDecision, Evidence, Policy, QueueAssignment, User,
};
use crate::state::{
    CaseFilter, CaseStore, DocumentStore, EvidenceStore, PolicyStore, QueueStore,
    RecommendationStore, UserStore,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// In-memory store backing every repository trait (for dev and testing)
#[derive(Clone, Default)]
pub struct InMemoryStore {
    cases: Arc<DashMap<String, Case>>,
    documents: Arc<DashMap<String, Vec<Document>>>,
    evidence: Arc<DashMap<String, Vec<Evidence>>>,
    recommendations: Arc<DashMap<String, Vec<AgentRecommendation>>>,
    ensembles: Arc<DashMap<String, Vec<EnsembleDecision>>>,
    policies: Arc<DashMap<String, Policy>>,
    assignments: Arc<DashMap<String, QueueAssignment>>,
    users: Arc<DashMap<String, User>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CaseStore for InMemoryStore {
    async fn save_case(&self, case: &Case) -> Result<()> {
        self.cases.insert(case.case_id.clone(), case.clone());
        tracing::debug!(case_id = %case.case_id, "Case saved");
        Ok(())
    }

    async fn get_case(&self, case_id: &str) -> Result<Option<Case>> {
        Ok(self.cases.get(case_id).map(|entry| entry.clone()))
    }

    async fn update_case(&self, case: &Case) -> Result<()> {
        if self.cases.contains_key(&case.case_id) {
            self.cases.insert(case.case_id.clone(), case.clone());
            tracing::debug!(case_id = %case.case_id, status = %case.status, "Case updated");
            Ok(())
        } else {
            Err(AppError::NotFound(format!(
                "Case {} not found",
                case.case_id
            )))
        }
    }

    async fn list_cases(
        &self,
        filter: &CaseFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Case>> {
        let mut cases: Vec<Case> = self
            .cases
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|case| {
                let status_match = filter
                    .status
                    .map(|status| case.status == status)
                    .unwrap_or(true);
                let vertical_match = filter
                    .vertical
                    .as_deref()
                    .map(|v| case.vertical == v)
                    .unwrap_or(true);
                let customer_match = filter
                    .customer_id
                    .as_deref()
                    .map(|c| case.customer_id.as_deref() == Some(c))
                    .unwrap_or(true);

                status_match && vertical_match && customer_match
            })
            .collect();

        cases.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(cases.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn save_document(&self, document: &Document) -> Result<()> {
        self.documents
            .entry(document.case_id.clone())
            .or_default()
            .push(document.clone());
        Ok(())
    }

    async fn list_documents(&self, case_id: &str) -> Result<Vec<Document>> {
        Ok(self
            .documents
            .get(case_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl EvidenceStore for InMemoryStore {
    async fn save_evidence(&self, mut evidence: Evidence) -> Result<Evidence> {
        let mut entry = self.evidence.entry(evidence.case_id.clone()).or_default();

        let next_version = entry
            .iter()
            .filter(|e| e.evidence_type == evidence.evidence_type)
            .map(|e| e.version)
            .max()
            .unwrap_or(0)
            + 1;

        evidence.version = next_version;
        entry.push(evidence.clone());

        tracing::debug!(
            case_id = %evidence.case_id,
            evidence_type = %evidence.evidence_type,
            version = evidence.version,
            "Evidence saved"
        );
        Ok(evidence)
    }

    async fn latest_evidence(&self, case_id: &str) -> Result<Vec<Evidence>> {
        let all = self
            .evidence
            .get(case_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();

        // Highest version wins per evidence type
        let mut latest: std::collections::BTreeMap<String, Evidence> =
            std::collections::BTreeMap::new();
        for evidence in all {
            match latest.get(&evidence.evidence_type) {
                Some(existing) if existing.version >= evidence.version => {}
                _ => {
                    latest.insert(evidence.evidence_type.clone(), evidence);
                }
            }
        }

        Ok(latest.into_values().collect())
    }

    async fn all_evidence(&self, case_id: &str) -> Result<Vec<Evidence>> {
        Ok(self
            .evidence
            .get(case_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl RecommendationStore for InMemoryStore {
    async fn save_recommendation(&self, recommendation: &AgentRecommendation) -> Result<()> {
        self.recommendations
            .entry(recommendation.case_id.clone())
            .or_default()
            .push(recommendation.clone());
        Ok(())
    }

    async fn list_recommendations(&self, case_id: &str) -> Result<Vec<AgentRecommendation>> {
        Ok(self
            .recommendations
            .get(case_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn save_ensemble(&self, mut ensemble: EnsembleDecision) -> Result<EnsembleDecision> {
        let mut entry = self.ensembles.entry(ensemble.case_id.clone()).or_default();

        ensemble.attempt = entry.iter().map(|e| e.attempt).max().unwrap_or(0) + 1;
        entry.push(ensemble.clone());

        tracing::debug!(
            case_id = %ensemble.case_id,
            attempt = ensemble.attempt,
            strategy = %ensemble.voting_strategy,
            "Ensemble decision saved"
        );
        Ok(ensemble)
    }

    async fn latest_ensemble(&self, case_id: &str) -> Result<Option<EnsembleDecision>> {
        Ok(self
            .ensembles
            .get(case_id)
            .and_then(|entry| entry.iter().max_by_key(|e| e.attempt).cloned()))
    }
}

#[async_trait]
impl PolicyStore for InMemoryStore {
    async fn save_policy(&self, policy: &Policy) -> Result<()> {
        if policy.active {
            // At most one active policy per vertical
            for mut entry in self.policies.iter_mut() {
                if entry.vertical == policy.vertical && entry.policy_id != policy.policy_id {
                    entry.active = false;
                }
            }
        }
        self.policies
            .insert(policy.policy_id.clone(), policy.clone());
        tracing::debug!(policy_id = %policy.policy_id, vertical = %policy.vertical, "Policy saved");
        Ok(())
    }

    async fn get_policy(&self, policy_id: &str) -> Result<Option<Policy>> {
        Ok(self.policies.get(policy_id).map(|entry| entry.clone()))
    }

    async fn active_policy(&self, vertical: &str) -> Result<Option<Policy>> {
        Ok(self
            .policies
            .iter()
            .find(|entry| entry.vertical == vertical && entry.active)
            .map(|entry| entry.clone()))
    }

    async fn list_policies(&self) -> Result<Vec<Policy>> {
        let mut policies: Vec<Policy> =
            self.policies.iter().map(|entry| entry.clone()).collect();
        policies.sort_by(|a, b| a.policy_id.cmp(&b.policy_id));
        Ok(policies)
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn save_assignment(&self, assignment: &QueueAssignment) -> Result<()> {
        self.assignments
            .insert(assignment.assignment_id.clone(), assignment.clone());
        Ok(())
    }

    async fn get_assignment(&self, assignment_id: &str) -> Result<Option<QueueAssignment>> {
        Ok(self.assignments.get(assignment_id).map(|entry| entry.clone()))
    }

    async fn update_assignment(&self, assignment: &QueueAssignment) -> Result<()> {
        if self.assignments.contains_key(&assignment.assignment_id) {
            self.assignments
                .insert(assignment.assignment_id.clone(), assignment.clone());
            Ok(())
        } else {
            Err(AppError::NotFound(format!(
                "Assignment {} not found",
                assignment.assignment_id
            )))
        }
    }

    async fn open_assignments(&self, role: &str) -> Result<Vec<QueueAssignment>> {
        Ok(self
            .assignments
            .iter()
            .filter(|entry| entry.assigned_role == role && entry.is_open())
            .map(|entry| entry.clone())
            .collect())
    }

    async fn case_assignments(&self, case_id: &str) -> Result<Vec<QueueAssignment>> {
        Ok(self
            .assignments
            .iter()
            .filter(|entry| entry.case_id == case_id)
            .map(|entry| entry.clone())
            .collect())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn save_user(&self, user: &User) -> Result<()> {
        self.users.insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|entry| entry.email == email)
            .map(|entry| entry.clone()))
    }
}
