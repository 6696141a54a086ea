use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

use crate::error::{AppError, Result};
use crate::models::recommendation::ActionType;

/// Ordered rules + state machine + voting config for a vertical.
///
/// At most one policy is active per vertical. Once a case binds a policy
/// version the record is immutable; policies are superseded, not edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub policy_name: String,
    pub version: String,
    pub vertical: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub voting_strategy: VotingStrategyConfig,
    pub rules: Vec<PolicyRule>,
    pub state_machine: StateMachine,
}

impl Policy {
    /// Validate policy invariants enforced at load/publish time
    pub fn validate(&self) -> Result<()> {
        if self.rules.is_empty() {
            return Err(AppError::PolicyConfig(format!(
                "policy {} has no rules",
                self.policy_id
            )));
        }

        if !self.rules.iter().any(|r| r.condition.trim() == "*") {
            return Err(AppError::PolicyConfig(format!(
                "policy {} is missing the default '*' rule",
                self.policy_id
            )));
        }

        if self.state_machine.states.is_empty() {
            return Err(AppError::PolicyConfig(format!(
                "policy {} has an empty state machine",
                self.policy_id
            )));
        }

        for terminal in &self.state_machine.terminal_states {
            if !self.state_machine.states.contains(terminal) {
                return Err(AppError::PolicyConfig(format!(
                    "policy {}: terminal state '{}' is not a declared state",
                    self.policy_id, terminal
                )));
            }
        }

        for (key, spec) in &self.state_machine.transitions {
            if TransitionPattern::parse(key).is_none() {
                return Err(AppError::PolicyConfig(format!(
                    "policy {}: malformed transition key '{}'",
                    self.policy_id, key
                )));
            }
            if spec.allowed_actors.is_empty() {
                return Err(AppError::PolicyConfig(format!(
                    "policy {}: transition '{}' allows no actors",
                    self.policy_id, key
                )));
            }
        }

        Ok(())
    }

    /// Rules sorted by priority ascending (lower number wins)
    pub fn sorted_rules(&self) -> Vec<&PolicyRule> {
        let mut rules: Vec<&PolicyRule> = self.rules.iter().collect();
        rules.sort_by_key(|r| r.priority);
        rules
    }
}

/// A single policy rule; lower priority number = higher precedence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub priority: i32,
    pub name: String,

    /// Condition in the rule DSL; `*` is the wildcard default
    pub condition: String,

    pub action: ActionType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_role: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_hours: Option<u32>,

    #[serde(default)]
    pub mandatory_reasoning: bool,
}

/// Voting strategy selection + tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingStrategyConfig {
    #[serde(rename = "type")]
    pub strategy: VotingStrategyKind,

    #[serde(default)]
    pub config: VotingConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VotingStrategyKind {
    Weighted,
    Conservative,
    RiskWeighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingConfig {
    /// Per-agent weights; unknown agents default to 1.0
    #[serde(default)]
    pub agent_weights: HashMap<String, f64>,

    /// Aggregate risk at or above this requires unanimous approval
    #[serde(default = "default_high_risk_threshold")]
    pub high_risk_threshold: u32,

    /// Aggregate risk at or below this uses plain majority
    #[serde(default = "default_low_risk_threshold")]
    pub low_risk_threshold: u32,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            agent_weights: HashMap::new(),
            high_risk_threshold: default_high_risk_threshold(),
            low_risk_threshold: default_low_risk_threshold(),
        }
    }
}

fn default_high_risk_threshold() -> u32 {
    70
}

fn default_low_risk_threshold() -> u32 {
    30
}

/// Pure-data state machine: transition patterns mapped to allowed actors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachine {
    pub states: Vec<String>,
    pub transitions: HashMap<String, TransitionSpec>,
    pub terminal_states: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub allowed_actors: Vec<String>,
}

/// A parsed `"FROM → TO"` transition key; either side may be `*` or a
/// `prefix.*` substate wildcard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPattern {
    pub from: StatePattern,
    pub to: StatePattern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatePattern {
    Exact(String),
    SubstateWildcard(String),
    Any,
}

impl StatePattern {
    fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if s == "*" {
            Some(StatePattern::Any)
        } else if let Some(prefix) = s.strip_suffix(".*") {
            if prefix.is_empty() {
                None
            } else {
                Some(StatePattern::SubstateWildcard(prefix.to_string()))
            }
        } else {
            Some(StatePattern::Exact(s.to_string()))
        }
    }

    /// Match a concrete dotted state name against this pattern
    pub fn matches(&self, state: &str) -> bool {
        match self {
            StatePattern::Any => true,
            StatePattern::Exact(name) => name == state,
            StatePattern::SubstateWildcard(prefix) => state
                .strip_prefix(prefix.as_str())
                .map(|rest| rest.starts_with('.'))
                .unwrap_or(false),
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, StatePattern::Exact(_))
    }

    pub fn is_substate(&self) -> bool {
        matches!(self, StatePattern::SubstateWildcard(_))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, StatePattern::Any)
    }
}

impl TransitionPattern {
    /// Parse a `"from → to"` key; accepts both the arrow and `->`
    pub fn parse(key: &str) -> Option<Self> {
        let (from, to) = key
            .split_once('→')
            .or_else(|| key.split_once("->"))?;
        Some(Self {
            from: StatePattern::parse(from)?,
            to: StatePattern::parse(to)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::default_kyc_policy;

    #[test]
    fn test_default_policy_is_valid() {
        default_kyc_policy().validate().unwrap();
    }

    #[test]
    fn test_policy_without_default_rule_rejected() {
        let mut policy = default_kyc_policy();
        policy.rules.retain(|r| r.condition != "*");
        let err = policy.validate().unwrap_err();
        assert_eq!(err.error_code(), "POLICY_CONFIG_ERROR");
    }

    #[test]
    fn test_malformed_transition_key_rejected() {
        let mut policy = default_kyc_policy();
        policy.state_machine.transitions.insert(
            "draft submitted".to_string(),
            TransitionSpec {
                allowed_actors: vec!["system".to_string()],
            },
        );
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_transition_pattern_parsing() {
        let p = TransitionPattern::parse("draft → submitted").unwrap();
        assert_eq!(p.from, StatePattern::Exact("draft".to_string()));
        assert_eq!(p.to, StatePattern::Exact("submitted".to_string()));

        let p = TransitionPattern::parse("under_review.* → approved").unwrap();
        assert!(p.from.is_substate());

        let p = TransitionPattern::parse("* → expired").unwrap();
        assert!(p.from.is_any());

        assert!(TransitionPattern::parse("nonsense").is_none());
    }

    #[test]
    fn test_substate_wildcard_matching() {
        let pattern = StatePattern::SubstateWildcard("under_review".to_string());
        assert!(pattern.matches("under_review.manual_review"));
        assert!(pattern.matches("under_review.identity_check"));
        assert!(!pattern.matches("under_review"));
        assert!(!pattern.matches("under_reviewer.x"));
        assert!(!pattern.matches("approved"));
    }

    #[test]
    fn test_sorted_rules_priority_ascending() {
        let policy = default_kyc_policy();
        let sorted = policy.sorted_rules();
        for window in sorted.windows(2) {
            assert!(window[0].priority <= window[1].priority);
        }
        assert_eq!(sorted[0].name, "Sanctions Hit");
    }
}
