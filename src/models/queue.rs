use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::case::short_id;

/// Work item routed to a role for human decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueAssignment {
    pub assignment_id: String,
    pub case_id: String,
    pub queue: String,
    pub assigned_role: String,
    pub assigned_to_user: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueAssignment {
    pub fn new(
        case_id: impl Into<String>,
        assigned_role: impl Into<String>,
        priority: i32,
        sla_deadline: Option<DateTime<Utc>>,
    ) -> Self {
        let assigned_role = assigned_role.into();
        Self {
            assignment_id: format!("asn_{}", short_id()),
            case_id: case_id.into(),
            queue: format!("queue_{assigned_role}"),
            assigned_role,
            assigned_to_user: None,
            claimed_at: None,
            sla_deadline,
            priority,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.assigned_to_user.is_some()
    }

    pub fn is_open(&self) -> bool {
        !self.is_claimed() && self.completed_at.is_none()
    }
}
