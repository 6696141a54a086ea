use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::models::{
    ActionType, AgentRecommendation, AgentVote, EnsembleRecommendation, VotingConfig,
    VotingDetails, VotingStrategyKind,
};

/// Combine agent recommendations into an ensemble outcome.
///
/// Strategies are pure functions over `(recommendations, config)`; the input
/// order is the agent registration order and fixes reasoning synthesis.
pub fn vote(
    strategy: VotingStrategyKind,
    config: &VotingConfig,
    recommendations: &[AgentRecommendation],
) -> Result<(Vec<AgentVote>, EnsembleRecommendation)> {
    if recommendations.is_empty() {
        return Err(AppError::Internal(
            "cannot synthesize an ensemble from zero recommendations".to_string(),
        ));
    }

    match strategy {
        VotingStrategyKind::Weighted => Ok(weighted_voting(recommendations, config)),
        VotingStrategyKind::Conservative => Ok(conservative_voting(recommendations)),
        VotingStrategyKind::RiskWeighted => Ok(risk_weighted_voting(recommendations, config)),
    }
}

/// Weighted voting: the action with the highest total weight wins; weight
/// ties break toward the more restrictive action.
fn weighted_voting(
    recommendations: &[AgentRecommendation],
    config: &VotingConfig,
) -> (Vec<AgentVote>, EnsembleRecommendation) {
    let votes = collect_votes(recommendations, config);
    let weighted_confidence = weighted_confidence(&votes);

    let action_weights = action_weights(&votes);
    let final_action = weighted_winner(&action_weights);

    let consensus_level = weight_consensus_label(&action_weights);
    let (risk_score, risk_flags) = aggregate_risk(recommendations);
    let reasoning = synthesize_reasoning(recommendations, final_action);

    let final_recommendation = EnsembleRecommendation {
        action: final_action,
        confidence: weighted_confidence,
        reasoning,
        risk_score,
        risk_flags,
        voting_details: voting_details(&votes, weighted_confidence, consensus_level),
    };

    (votes, final_recommendation)
}

/// Conservative voting: the single most restrictive recommendation wins and
/// contributes its own confidence.
fn conservative_voting(
    recommendations: &[AgentRecommendation],
) -> (Vec<AgentVote>, EnsembleRecommendation) {
    let votes: Vec<AgentVote> = recommendations
        .iter()
        .map(|rec| AgentVote {
            agent: rec.agent_name.clone(),
            action: rec.recommendation.action,
            confidence: rec.recommendation.confidence,
            weight: 1.0,
        })
        .collect();

    let most_restrictive = recommendations
        .iter()
        .max_by_key(|rec| rec.recommendation.action.restrictiveness())
        .expect("recommendations are non-empty");

    let final_action = most_restrictive.recommendation.action;
    let final_confidence = most_restrictive.recommendation.confidence;

    let (risk_score, risk_flags) = aggregate_risk(recommendations);
    let reasoning = format!(
        "Conservative strategy: {} recommended {}, which is the most restrictive action.",
        most_restrictive.agent_name, final_action
    );

    let final_recommendation = EnsembleRecommendation {
        action: final_action,
        confidence: final_confidence,
        reasoning,
        risk_score,
        risk_flags,
        voting_details: voting_details(&votes, final_confidence, "conservative".to_string()),
    };

    (votes, final_recommendation)
}

/// Risk-weighted voting: aggregate risk selects the consensus regime.
/// High risk requires unanimous approval, low risk uses plain majority,
/// medium risk falls back to weighted voting.
fn risk_weighted_voting(
    recommendations: &[AgentRecommendation],
    config: &VotingConfig,
) -> (Vec<AgentVote>, EnsembleRecommendation) {
    let votes = collect_votes(recommendations, config);
    let weighted_confidence = weighted_confidence(&votes);
    let (risk_score, risk_flags) = aggregate_risk(recommendations);

    let (final_action, consensus_level) = if risk_score >= config.high_risk_threshold {
        let all_approve = votes.iter().all(|v| v.action == ActionType::Approve);
        if all_approve {
            (ActionType::Approve, "unanimous".to_string())
        } else {
            (ActionType::ManualReview, "not_unanimous".to_string())
        }
    } else if risk_score <= config.low_risk_threshold {
        let counts = action_counts(&votes);
        let winner = majority_winner(&counts);
        let label = if counts.get(&winner).copied().unwrap_or(0) == votes.len() as u32 {
            "unanimous".to_string()
        } else {
            "majority".to_string()
        };
        (winner, label)
    } else {
        let weights = action_weights(&votes);
        (weighted_winner(&weights), "weighted".to_string())
    };

    let reasoning = synthesize_reasoning(recommendations, final_action);

    let final_recommendation = EnsembleRecommendation {
        action: final_action,
        confidence: weighted_confidence,
        reasoning,
        risk_score,
        risk_flags,
        voting_details: voting_details(&votes, weighted_confidence, consensus_level),
    };

    (votes, final_recommendation)
}

// ============================================================================
// Shared vote arithmetic
// ============================================================================

fn collect_votes(recommendations: &[AgentRecommendation], config: &VotingConfig) -> Vec<AgentVote> {
    recommendations
        .iter()
        .map(|rec| AgentVote {
            agent: rec.agent_name.clone(),
            action: rec.recommendation.action,
            confidence: rec.recommendation.confidence,
            weight: config
                .agent_weights
                .get(&rec.agent_name)
                .copied()
                .unwrap_or(1.0),
        })
        .collect()
}

/// Σ(confidence · weight) / Σ weight
fn weighted_confidence(votes: &[AgentVote]) -> f64 {
    let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    votes.iter().map(|v| v.confidence * v.weight).sum::<f64>() / total_weight
}

fn action_weights(votes: &[AgentVote]) -> HashMap<ActionType, f64> {
    let mut weights = HashMap::new();
    for vote in votes {
        *weights.entry(vote.action).or_insert(0.0) += vote.weight;
    }
    weights
}

fn action_counts(votes: &[AgentVote]) -> HashMap<ActionType, u32> {
    let mut counts = HashMap::new();
    for vote in votes {
        *counts.entry(vote.action).or_insert(0) += 1;
    }
    counts
}

/// Highest total weight wins; exact ties go to the more restrictive action
fn weighted_winner(weights: &HashMap<ActionType, f64>) -> ActionType {
    weights
        .iter()
        .max_by(|(a, wa), (b, wb)| {
            wa.partial_cmp(wb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.restrictiveness().cmp(&b.restrictiveness()))
        })
        .map(|(action, _)| *action)
        .expect("weights are non-empty")
}

/// Highest count wins; ties go to the more restrictive action
fn majority_winner(counts: &HashMap<ActionType, u32>) -> ActionType {
    counts
        .iter()
        .max_by(|(a, ca), (b, cb)| {
            ca.cmp(cb)
                .then_with(|| a.restrictiveness().cmp(&b.restrictiveness()))
        })
        .map(|(action, _)| *action)
        .expect("counts are non-empty")
}

fn weight_consensus_label(weights: &HashMap<ActionType, f64>) -> String {
    let total: f64 = weights.values().sum();
    let max = weights.values().cloned().fold(0.0_f64, f64::max);

    if (total - max).abs() < f64::EPSILON {
        "unanimous".to_string()
    } else if max > total * 0.7 {
        "strong_majority".to_string()
    } else if max > total * 0.5 {
        "majority".to_string()
    } else {
        "divided".to_string()
    }
}

fn voting_details(
    votes: &[AgentVote],
    weighted_confidence: f64,
    consensus_level: String,
) -> VotingDetails {
    let counts = action_counts(votes);
    VotingDetails {
        approve_votes: counts.get(&ActionType::Approve).copied().unwrap_or(0),
        reject_votes: counts.get(&ActionType::Reject).copied().unwrap_or(0),
        manual_review_votes: counts.get(&ActionType::ManualReview).copied().unwrap_or(0),
        escalate_votes: counts.get(&ActionType::Escalate).copied().unwrap_or(0),
        weighted_confidence,
        consensus_level,
    }
}

/// Risk aggregation: max score over recommendations that define one (50 when
/// none do); flag union preserves first-seen order and deduplicates
pub fn aggregate_risk(recommendations: &[AgentRecommendation]) -> (u32, Vec<String>) {
    let risk_score = recommendations
        .iter()
        .filter_map(|rec| rec.recommendation.risk_score)
        .max()
        .unwrap_or(50);

    let mut flags: Vec<String> = Vec::new();
    for rec in recommendations {
        for flag in &rec.recommendation.risk_flags {
            if !flags.contains(flag) {
                flags.push(flag.clone());
            }
        }
    }

    (risk_score.min(100), flags)
}

/// Deterministic reasoning string: per-agent summary lines in input order
fn synthesize_reasoning(recommendations: &[AgentRecommendation], final_action: ActionType) -> String {
    let points: Vec<String> = recommendations
        .iter()
        .map(|rec| {
            let title = agent_title(&rec.agent_name);
            let confidence_pct = (rec.recommendation.confidence * 100.0).round() as u32;
            let first_sentence = rec
                .recommendation
                .reasoning
                .split('.')
                .next()
                .unwrap_or("")
                .trim();
            format!(
                "{title} ({}, {confidence_pct}% confident): {first_sentence}",
                rec.recommendation.action
            )
        })
        .collect();

    format!("Ensemble decision: {final_action}. {}", points.join(" | "))
}

/// `identity_agent` → `Identity`
fn agent_title(agent_name: &str) -> String {
    let base = agent_name.strip_suffix("_agent").unwrap_or(agent_name);
    let mut chars = base.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => base.to_string(),
    }
}
