use crate::api::AppState;
use crate::cases::{CreateCaseInput, ReviewDecision};
use crate::error::Result;
use crate::models::{
    Actor, ActorType, AuditEvent, Case, CasePriority, CaseStatus, Policy, QueueAssignment,
    ReviewReasoning, ActionType,
};
use crate::policy::PolicySimulation;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use validator::Validate;

/// Health check endpoint
pub async fn health_check() -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Resolve the acting identity from request headers. Authentication itself
/// is the auth collaborator's concern; these headers carry its verdict.
fn actor_from_headers(headers: &HeaderMap) -> Actor {
    let actor_type = headers
        .get("x-actor-type")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| ActorType::from_str(v).ok())
        .unwrap_or(ActorType::Api);

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };

    Actor {
        actor_type,
        user_id: header("x-actor-id"),
        role: header("x-actor-role"),
        ip: None,
    }
}

/// Create a case
pub async fn create_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateCaseRequest>,
) -> Result<(StatusCode, Json<Case>)> {
    request.validate()?;

    let actor = actor_from_headers(&headers);
    let case = state
        .cases
        .create_case(
            CreateCaseInput {
                vertical: request.vertical,
                priority: request.priority,
                customer_id: request.customer_id,
                metadata: request.metadata,
            },
            actor,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(case)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCaseRequest {
    #[validate(length(min = 1, max = 50))]
    pub vertical: String,
    #[serde(default)]
    pub priority: CasePriority,
    pub customer_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Get a case with documents, evidence and its latest ensemble decision
pub async fn get_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::cases::CaseDetails>> {
    let details = state.cases.get_case_with_details(&id).await?;
    Ok(Json(details))
}

/// List cases
pub async fn list_cases(
    State(state): State<AppState>,
    Query(params): Query<ListCasesQuery>,
) -> Result<Json<ListCasesResponse>> {
    let filter = crate::state::CaseFilter {
        status: params
            .status
            .as_deref()
            .map(CaseStatus::from_str)
            .transpose()
            .map_err(crate::error::AppError::Validation)?,
        vertical: params.vertical,
        customer_id: params.customer_id,
    };

    let limit = params.limit.unwrap_or(50).min(200);
    let offset = params.offset.unwrap_or(0);

    let cases = state.cases.list_cases(&filter, limit, offset).await?;
    Ok(Json(ListCasesResponse {
        total: cases.len(),
        cases,
        limit,
        offset,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListCasesQuery {
    pub status: Option<String>,
    pub vertical: Option<String>,
    pub customer_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ListCasesResponse {
    pub cases: Vec<Case>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Submit a case for processing
pub async fn submit_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Case>> {
    let actor = actor_from_headers(&headers);
    let cancel = CancellationToken::new();
    let case = state.cases.submit_case(&id, actor, &cancel).await?;
    Ok(Json(case))
}

/// Push typed evidence onto a case (evidence-collector interface)
pub async fn add_evidence(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AddEvidenceRequest>,
) -> Result<(StatusCode, Json<crate::models::Evidence>)> {
    request.validate()?;

    let evidence = state
        .cases
        .add_evidence(&id, &request.evidence_type, request.data)
        .await?;
    Ok((StatusCode::CREATED, Json(evidence)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddEvidenceRequest {
    #[validate(length(min = 1, max = 50))]
    pub evidence_type: String,
    pub data: serde_json::Value,
}

/// Human review of a case
pub async fn review_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ReviewCaseRequest>,
) -> Result<Json<Case>> {
    request.validate()?;

    let mut actor = actor_from_headers(&headers);
    // A review is a human act even when relayed through the API
    if actor.actor_type == ActorType::Api {
        actor.actor_type = ActorType::Human;
        actor.role.get_or_insert_with(|| "reviewer".to_string());
    }

    let case = state
        .cases
        .review_case(
            &id,
            ReviewDecision {
                action: request.action,
                reasoning: ReviewReasoning {
                    rationale: request.reasoning.rationale,
                    structured_checks: request.reasoning.structured_checks,
                },
            },
            actor,
        )
        .await?;

    Ok(Json(case))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewCaseRequest {
    pub action: ActionType,
    #[validate(nested)]
    pub reasoning: ReviewReasoningRequest,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewReasoningRequest {
    #[validate(length(min = 50))]
    pub rationale: String,
    #[serde(default)]
    pub structured_checks: HashMap<String, bool>,
}

/// Audit trail for a case, ascending
pub async fn case_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AuditEvent>>> {
    // 404 for unknown cases rather than an empty history
    state.cases.get_case(&id).await?;
    let history = state.cases.audit().case_history(&id).await?;
    Ok(Json(history))
}

/// Claimable assignments for a role
pub async fn list_queue(
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> Result<Json<Vec<QueueAssignment>>> {
    let assignments = state.queues.list_claimable(&role).await?;
    Ok(Json(assignments))
}

/// Claim an assignment
pub async fn claim_assignment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(role): Path<String>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<QueueAssignment>> {
    let actor = actor_from_headers(&headers);
    let user_id = request
        .user_id
        .or(actor.user_id)
        .ok_or_else(|| crate::error::AppError::Validation("user_id is required".to_string()))?;

    let assignment = state
        .queues
        .claim(&role, &user_id, request.assignment_id.as_deref())
        .await?;
    Ok(Json(assignment))
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub user_id: Option<String>,
    pub assignment_id: Option<String>,
}

/// List policies
pub async fn list_policies(State(state): State<AppState>) -> Result<Json<Vec<Policy>>> {
    let policies = state.policy_engine.list_policies().await?;
    Ok(Json(policies))
}

/// Get a policy by id
pub async fn get_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Policy>> {
    let policy = state.policy_engine.get_policy(&id).await?;
    Ok(Json(policy.as_ref().clone()))
}

/// Simulate applying another policy to a decided case
pub async fn simulate_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SimulateRequest>,
) -> Result<Json<PolicySimulation>> {
    let details = state.cases.get_case_with_details(&request.case_id).await?;
    let ensemble = details.ensemble.ok_or_else(|| {
        crate::error::AppError::Validation(format!(
            "case {} has no ensemble decision to simulate against",
            request.case_id
        ))
    })?;

    let simulation = state
        .policy_engine
        .simulate(&id, &details.case, &ensemble, &details.evidence)
        .await?;
    Ok(Json(simulation))
}

#[derive(Debug, Deserialize)]
pub struct SimulateRequest {
    pub case_id: String,
}
