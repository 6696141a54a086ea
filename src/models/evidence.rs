use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::case::short_id;

/// Structured, versioned, immutable facts about a case.
///
/// Versions are monotonic per `(case_id, evidence_type)`; a higher version
/// supersedes earlier ones for analysis. Records are never mutated once
/// written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub evidence_id: String,
    pub case_id: String,
    pub evidence_type: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Evidence {
    /// Create version-1 evidence; the store bumps the version on save
    pub fn new(case_id: impl Into<String>, evidence_type: impl Into<String>, data: serde_json::Value) -> Self {
        let evidence_type = evidence_type.into();
        Self {
            evidence_id: format!("evd_{}_{}", evidence_type, short_id()),
            case_id: case_id.into(),
            evidence_type,
            version: 1,
            created_at: Utc::now(),
            data,
        }
    }

    /// Resolve a dot-separated path inside `data`, `None` if any segment is missing
    pub fn field(&self, path: &str) -> Option<&serde_json::Value> {
        let mut current = &self.data;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}
