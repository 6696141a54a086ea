pub mod handlers;
pub mod routes;

pub use routes::build_router;

use std::sync::Arc;

use crate::cases::CaseService;
use crate::policy::PolicyEngine;
use crate::queues::QueueService;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub cases: Arc<CaseService>,
    pub queues: Arc<QueueService>,
    pub policy_engine: Arc<PolicyEngine>,
}

impl AppState {
    pub fn new(
        cases: Arc<CaseService>,
        queues: Arc<QueueService>,
        policy_engine: Arc<PolicyEngine>,
    ) -> Self {
        Self {
            cases,
            queues,
            policy_engine,
        }
    }
}
