use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

use crate::models::case::short_id;

/// Action recommended by an agent, an ensemble, or mandated by a policy rule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionType {
    Approve,
    Reject,
    ManualReview,
    Escalate,
    RequestMoreInfo,
}

impl ActionType {
    /// Total restrictiveness ordering: REJECT > ESCALATE > MANUAL_REVIEW >
    /// REQUEST_MORE_INFO > APPROVE. Ties in voting break toward the higher
    /// rank.
    pub fn restrictiveness(&self) -> u8 {
        match self {
            ActionType::Reject => 5,
            ActionType::Escalate => 4,
            ActionType::ManualReview => 3,
            ActionType::RequestMoreInfo => 2,
            ActionType::Approve => 1,
        }
    }
}

/// The analytical output of a single agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: ActionType,

    /// Confidence in [0, 1]
    pub confidence: f64,

    /// Human-readable explanation
    pub reasoning: String,

    /// Risk score in [0, 100]; None when genuinely undefined
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<u32>,

    /// Deduplicated risk flags
    #[serde(default)]
    pub risk_flags: Vec<String>,

    /// Optional per-component confidence breakdown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_breakdown: Option<ConfidenceBreakdown>,

    /// Follow-up actions the agent requires
    #[serde(default)]
    pub required_actions: Vec<String>,
}

impl Recommendation {
    pub fn new(action: ActionType, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            action,
            confidence,
            reasoning: reasoning.into(),
            risk_score: None,
            risk_flags: Vec::new(),
            confidence_breakdown: None,
            required_actions: Vec::new(),
        }
    }

    pub fn with_risk(mut self, risk_score: u32, risk_flags: Vec<String>) -> Self {
        self.risk_score = Some(risk_score.min(100));
        self.risk_flags = risk_flags;
        self
    }

    /// Degraded stand-in used when an agent fails, times out or panics
    pub fn degraded(agent_name: &str) -> Self {
        Self {
            action: ActionType::ManualReview,
            confidence: 0.0,
            reasoning: format!(
                "Agent {agent_name} encountered an error and could not complete analysis."
            ),
            risk_score: Some(100),
            risk_flags: vec!["agent_error".to_string()],
            confidence_breakdown: None,
            required_actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub overall: f64,
    #[serde(default)]
    pub components: HashMap<String, f64>,
}

/// Persisted, append-only record of one agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecommendation {
    pub recommendation_id: String,
    pub case_id: String,
    pub agent_name: String,
    pub agent_version: String,
    pub timestamp: DateTime<Utc>,
    pub recommendation: Recommendation,
    pub processing_time_ms: u64,
}

impl AgentRecommendation {
    pub fn new(
        case_id: impl Into<String>,
        agent_name: impl Into<String>,
        agent_version: impl Into<String>,
        recommendation: Recommendation,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            recommendation_id: format!("rec_{}", short_id()),
            case_id: case_id.into(),
            agent_name: agent_name.into(),
            agent_version: agent_version.into(),
            timestamp: Utc::now(),
            recommendation,
            processing_time_ms,
        }
    }
}

/// One agent's vote inside an ensemble
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentVote {
    pub agent: String,
    pub action: ActionType,
    pub confidence: f64,
    pub weight: f64,
}

/// Vote bookkeeping attached to every ensemble decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingDetails {
    pub approve_votes: u32,
    pub reject_votes: u32,
    pub manual_review_votes: u32,
    pub escalate_votes: u32,
    pub weighted_confidence: f64,
    pub consensus_level: String,
}

/// The synthesized final recommendation of an ensemble
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleRecommendation {
    pub action: ActionType,
    pub confidence: f64,
    pub reasoning: String,
    pub risk_score: u32,
    pub risk_flags: Vec<String>,
    pub voting_details: VotingDetails,
}

/// Aggregated recommendation produced by a voting strategy.
///
/// Persisted once per processing run; `attempt` is monotonic per case and the
/// latest attempt is the active decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleDecision {
    pub ensemble_id: String,
    pub case_id: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub voting_strategy: String,
    pub agent_votes: Vec<AgentVote>,
    pub final_recommendation: EnsembleRecommendation,
}

impl EnsembleDecision {
    pub fn new(
        case_id: impl Into<String>,
        voting_strategy: impl Into<String>,
        agent_votes: Vec<AgentVote>,
        final_recommendation: EnsembleRecommendation,
    ) -> Self {
        Self {
            ensemble_id: format!("ens_{}", short_id()),
            case_id: case_id.into(),
            attempt: 1,
            timestamp: Utc::now(),
            voting_strategy: voting_strategy.into(),
            agent_votes,
            final_recommendation,
        }
    }
}
