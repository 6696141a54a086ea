use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{AuditEvent, ReconstructedState};

/// Append-only audit log.
///
/// The API exposes only append and read: no update, no delete. Per-case
/// ordering is total by `(timestamp, event_id)`. Backends should enforce
/// WORM semantics at the schema level where the storage supports it.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append an event; synchronous with the state write it accompanies
    async fn append(&self, event: AuditEvent) -> Result<AuditEvent>;

    /// Complete audit trail for a case, chronological ascending
    async fn case_history(&self, case_id: &str) -> Result<Vec<AuditEvent>>;

    /// Reconstruct case state by folding events in order, optionally only up
    /// to a timestamp
    async fn replay(
        &self,
        case_id: &str,
        up_to: Option<DateTime<Utc>>,
    ) -> Result<ReconstructedState> {
        let events = self.case_history(case_id).await?;
        Ok(replay_events(case_id, &events, up_to))
    }
}

/// Pure fold of audit events into a reconstructed state
pub fn replay_events(
    case_id: &str,
    events: &[AuditEvent],
    up_to: Option<DateTime<Utc>>,
) -> ReconstructedState {
    let mut state = ReconstructedState {
        case_id: case_id.to_string(),
        status: None,
        policy_version: None,
        last_actor: None,
        ensemble_seen: false,
        event_count: 0,
    };

    for event in events {
        if let Some(cutoff) = up_to {
            if event.timestamp > cutoff {
                break;
            }
        }

        state.event_count += 1;
        state.last_actor = Some(event.actor.describe());

        if let Some(transition) = &event.transition {
            state.status = Some(transition.to.clone());
        }
        if let Some(version) = &event.policy_version {
            state.policy_version = Some(version.clone());
        }
        if event.event_type == "ensemble.stored" {
            state.ensemble_seen = true;
        }
    }

    state
}

/// In-memory append-only audit log
#[derive(Clone, Default)]
pub struct InMemoryAuditLog {
    events: Arc<DashMap<String, Vec<AuditEvent>>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, event: AuditEvent) -> Result<AuditEvent> {
        tracing::debug!(
            case_id = %event.case_id,
            event_type = %event.event_type,
            event_id = %event.event_id,
            "Audit event appended"
        );
        self.events
            .entry(event.case_id.clone())
            .or_default()
            .push(event.clone());
        Ok(event)
    }

    async fn case_history(&self, case_id: &str) -> Result<Vec<AuditEvent>> {
        let mut events = self
            .events
            .get(case_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();

        events.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        Ok(events)
    }
}
