use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Database / repository errors
    #[error("Database error: {0}")]
    Database(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Guarded state transition refused by the policy state machine
    #[error("Transition {from} → {to} not allowed for actor '{actor}'")]
    StateRefused {
        from: String,
        to: String,
        actor: String,
        required_actors: Vec<String>,
    },

    /// Resource conflict (e.g. queue assignment already claimed)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Policy configuration errors (missing default rule, malformed state machine)
    #[error("Policy configuration error: {0}")]
    PolicyConfig(String),

    /// Rule DSL evaluation errors; audited and treated as a non-match
    #[error("Rule evaluation error: {0}")]
    RuleEval(String),

    /// Agent failures; isolated by the orchestrator
    #[error("Agent error ({agent}): {message}")]
    Agent { agent: String, message: String },

    /// Evidence could not be collected
    #[error("Evidence unavailable: {0}")]
    EvidenceUnavailable(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::StateRefused { .. } => StatusCode::CONFLICT,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PolicyConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::RuleEval(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Agent { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::EvidenceUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::StateRefused { .. } => "STATE_REFUSED",
            AppError::Conflict(_) => "CONFLICT",
            AppError::PolicyConfig(_) => "POLICY_CONFIG_ERROR",
            AppError::RuleEval(_) => "RULE_EVAL_ERROR",
            AppError::Agent { .. } => "AGENT_ERROR",
            AppError::EvidenceUnavailable(_) => "EVIDENCE_UNAVAILABLE",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        tracing::error!(
            error_code = error_code,
            status_code = status.as_u16(),
            message = %message,
            "Request error"
        );

        let mut details = json!({
            "code": error_code,
            "message": message,
            "status": status.as_u16(),
        });

        // StateRefused carries structured context for the client
        if let AppError::StateRefused {
            from,
            to,
            actor,
            required_actors,
        } = &self
        {
            details["transition"] = json!({
                "from": from,
                "to": to,
                "actor": actor,
                "required_actors": required_actors,
            });
        }

        let body = Json(json!({ "error": details }));

        (status, body).into_response()
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
