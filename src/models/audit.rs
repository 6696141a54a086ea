use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::case::{short_id, Actor, CaseStatus};

/// Append-only record of an action with actor, transition and snapshots.
///
/// Events are never updated or deleted; per-case ordering is total by
/// `(timestamp, event_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub case_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub actor: Actor,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<StateTransition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReviewReasoning>,

    /// Evidence stored by value so the event survives later row deletion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_snapshot: Option<serde_json::Value>,

    /// Ensemble decision stored by value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_recommendation: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_rule_matched: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AuditEvent {
    pub fn new(case_id: impl Into<String>, event_type: impl Into<String>, actor: Actor) -> Self {
        Self {
            event_id: format!("evt_{}", short_id()),
            case_id: case_id.into(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            actor,
            transition: None,
            reasoning: None,
            evidence_snapshot: None,
            agent_recommendation: None,
            policy_version: None,
            policy_rule_matched: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_transition(mut self, from: CaseStatus, to: CaseStatus) -> Self {
        self.transition = Some(StateTransition {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn with_policy_version(mut self, version: impl Into<String>) -> Self {
        self.policy_version = Some(version.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateTransition {
    pub from: String,
    pub to: String,
}

/// Reasoning supplied by a human reviewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewReasoning {
    pub rationale: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub structured_checks: HashMap<String, bool>,
}

/// State reconstructed by folding a case's audit events in order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconstructedState {
    pub case_id: String,
    pub status: Option<String>,
    pub policy_version: Option<String>,
    pub last_actor: Option<String>,
    pub ensemble_seen: bool,
    pub event_count: usize,
}
