use chrono::Utc;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::QueueAssignment;
use crate::state::QueueStore;

/// Claimable work queues for human reviewer roles
pub struct QueueService {
    store: Arc<dyn QueueStore>,
}

impl QueueService {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Claimable assignments for a role: priority descending, then SLA
    /// ascending (missing SLAs last), then creation time ascending.
    pub async fn list_claimable(&self, role: &str) -> Result<Vec<QueueAssignment>> {
        let mut assignments = self.store.open_assignments(role).await?;

        assignments.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| match (a.sla_deadline, b.sla_deadline) {
                    (Some(left), Some(right)) => left.cmp(&right),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        Ok(assignments)
    }

    /// Claim an assignment for a user. Without an explicit assignment id the
    /// head of the role's queue is claimed. Claiming an already-claimed
    /// assignment is a conflict.
    pub async fn claim(
        &self,
        role: &str,
        user_id: &str,
        assignment_id: Option<&str>,
    ) -> Result<QueueAssignment> {
        let mut assignment = match assignment_id {
            Some(id) => self
                .store
                .get_assignment(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Assignment {id} not found")))?,
            None => self
                .list_claimable(role)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    AppError::NotFound(format!("No claimable assignments for role '{role}'"))
                })?,
        };

        if assignment.assigned_role != role {
            return Err(AppError::Validation(format!(
                "assignment {} belongs to role '{}', not '{role}'",
                assignment.assignment_id, assignment.assigned_role
            )));
        }

        if assignment.is_claimed() {
            return Err(AppError::Conflict(format!(
                "assignment {} is already claimed",
                assignment.assignment_id
            )));
        }

        assignment.assigned_to_user = Some(user_id.to_string());
        assignment.claimed_at = Some(Utc::now());
        self.store.update_assignment(&assignment).await?;

        tracing::info!(
            assignment_id = %assignment.assignment_id,
            case_id = %assignment.case_id,
            user_id = %user_id,
            "Assignment claimed"
        );
        Ok(assignment)
    }
}
