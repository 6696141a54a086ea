pub mod memory;

pub use memory::InMemoryStore;

use crate::error::Result;
use crate::models::{
    AgentRecommendation, Case, CaseStatus, Document, EnsembleDecision, Evidence, Policy,
    QueueAssignment, User,
};
use async_trait::async_trait;

/// Trait for case storage operations
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Save a new case
    async fn save_case(&self, case: &Case) -> Result<()>;

    /// Get a case by ID
    async fn get_case(&self, case_id: &str) -> Result<Option<Case>>;

    /// Update an existing case
    async fn update_case(&self, case: &Case) -> Result<()>;

    /// List cases with filtering, newest first
    async fn list_cases(&self, filter: &CaseFilter, limit: usize, offset: usize)
        -> Result<Vec<Case>>;
}

/// Filter for querying cases
#[derive(Debug, Clone, Default)]
pub struct CaseFilter {
    pub status: Option<CaseStatus>,
    pub vertical: Option<String>,
    pub customer_id: Option<String>,
}

/// Trait for document storage operations
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn save_document(&self, document: &Document) -> Result<()>;

    async fn list_documents(&self, case_id: &str) -> Result<Vec<Document>>;
}

/// Trait for evidence storage; evidence is immutable after write
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Persist evidence, assigning the next version for
    /// `(case_id, evidence_type)`; returns the stored record
    async fn save_evidence(&self, evidence: Evidence) -> Result<Evidence>;

    /// Latest-version evidence per type for a case
    async fn latest_evidence(&self, case_id: &str) -> Result<Vec<Evidence>>;

    /// All evidence versions for a case
    async fn all_evidence(&self, case_id: &str) -> Result<Vec<Evidence>>;
}

/// Trait for agent recommendation + ensemble persistence (append-only)
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn save_recommendation(&self, recommendation: &AgentRecommendation) -> Result<()>;

    async fn list_recommendations(&self, case_id: &str) -> Result<Vec<AgentRecommendation>>;

    /// Persist an ensemble decision, assigning the next attempt number for
    /// the case; returns the stored record
    async fn save_ensemble(&self, ensemble: EnsembleDecision) -> Result<EnsembleDecision>;

    /// Latest-attempt ensemble decision for a case
    async fn latest_ensemble(&self, case_id: &str) -> Result<Option<EnsembleDecision>>;
}

/// Trait for policy storage
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Persist a policy; activating one deactivates any other active policy
    /// for the same vertical
    async fn save_policy(&self, policy: &Policy) -> Result<()>;

    async fn get_policy(&self, policy_id: &str) -> Result<Option<Policy>>;

    async fn active_policy(&self, vertical: &str) -> Result<Option<Policy>>;

    async fn list_policies(&self) -> Result<Vec<Policy>>;
}

/// Trait for queue assignment storage
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn save_assignment(&self, assignment: &QueueAssignment) -> Result<()>;

    async fn get_assignment(&self, assignment_id: &str) -> Result<Option<QueueAssignment>>;

    async fn update_assignment(&self, assignment: &QueueAssignment) -> Result<()>;

    /// Open (unclaimed, uncompleted) assignments for a role
    async fn open_assignments(&self, role: &str) -> Result<Vec<QueueAssignment>>;

    /// All assignments for a case
    async fn case_assignments(&self, case_id: &str) -> Result<Vec<QueueAssignment>>;
}

/// Trait for user storage
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn save_user(&self, user: &User) -> Result<()>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
}
