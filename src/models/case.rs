use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumString};
use uuid::Uuid;

/// A unit of decision work tied to a subject and a bound policy version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    /// Unique identifier (opaque string, `case_` prefixed)
    pub case_id: String,

    /// Business vertical (e.g. kyc)
    pub vertical: String,

    /// Current status
    pub status: CaseStatus,

    /// Priority level
    pub priority: CasePriority,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// SLA deadline; cleared when the case reaches a terminal status
    pub sla_deadline: Option<DateTime<Utc>>,

    /// Policy version bound at creation; immutable afterwards
    pub policy_version: String,

    /// Customer reference
    pub customer_id: Option<String>,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Case {
    /// Create a new case in DRAFT bound to the given policy version
    pub fn new(
        vertical: String,
        priority: CasePriority,
        policy_version: String,
        customer_id: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            case_id: format!("case_{}", short_id()),
            vertical,
            status: CaseStatus::Draft,
            priority,
            created_at: now,
            updated_at: now,
            sla_deadline: None,
            policy_version,
            customer_id,
            metadata,
        }
    }

    /// Check if the case is in a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Generate a short unique id suffix
pub fn short_id() -> String {
    Uuid::new_v4().to_string()[..12].to_string()
}

/// Review substage of UNDER_REVIEW
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewStage {
    IdentityCheck,
    FraudCheck,
    ComplianceCheck,
    ManualReview,
}

impl ReviewStage {
    fn as_str(&self) -> &'static str {
        match self {
            ReviewStage::IdentityCheck => "identity_check",
            ReviewStage::FraudCheck => "fraud_check",
            ReviewStage::ComplianceCheck => "compliance_check",
            ReviewStage::ManualReview => "manual_review",
        }
    }
}

/// Case lifecycle status; UNDER_REVIEW carries a dotted substage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseStatus {
    Draft,
    Submitted,
    Processing,
    UnderReview(ReviewStage),
    Approved,
    Rejected,
    NeedsMoreInfo,
    Expired,
}

impl CaseStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaseStatus::Approved | CaseStatus::Rejected | CaseStatus::Expired
        )
    }

    /// Statuses a human reviewer may act on
    pub fn is_reviewable(&self) -> bool {
        matches!(self, CaseStatus::UnderReview(_))
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseStatus::Draft => write!(f, "draft"),
            CaseStatus::Submitted => write!(f, "submitted"),
            CaseStatus::Processing => write!(f, "processing"),
            CaseStatus::UnderReview(stage) => write!(f, "under_review.{}", stage.as_str()),
            CaseStatus::Approved => write!(f, "approved"),
            CaseStatus::Rejected => write!(f, "rejected"),
            CaseStatus::NeedsMoreInfo => write!(f, "needs_more_info"),
            CaseStatus::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for CaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CaseStatus::Draft),
            "submitted" => Ok(CaseStatus::Submitted),
            "processing" => Ok(CaseStatus::Processing),
            "under_review" | "under_review.manual_review" => {
                Ok(CaseStatus::UnderReview(ReviewStage::ManualReview))
            }
            "under_review.identity_check" => Ok(CaseStatus::UnderReview(ReviewStage::IdentityCheck)),
            "under_review.fraud_check" => Ok(CaseStatus::UnderReview(ReviewStage::FraudCheck)),
            "under_review.compliance_check" => {
                Ok(CaseStatus::UnderReview(ReviewStage::ComplianceCheck))
            }
            "approved" => Ok(CaseStatus::Approved),
            "rejected" => Ok(CaseStatus::Rejected),
            "needs_more_info" => Ok(CaseStatus::NeedsMoreInfo),
            "expired" => Ok(CaseStatus::Expired),
            other => Err(format!("unknown case status: {other}")),
        }
    }
}

impl Serialize for CaseStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CaseStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CaseStatus::from_str(&s).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CasePriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl CasePriority {
    /// Numeric priority used for queue ordering (higher is more urgent)
    pub fn queue_priority(&self) -> i32 {
        match self {
            CasePriority::Urgent => 100,
            CasePriority::High => 75,
            CasePriority::Normal => 50,
            CasePriority::Low => 25,
        }
    }
}

impl Default for CasePriority {
    fn default() -> Self {
        CasePriority::Normal
    }
}

/// Who performed an action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    #[serde(rename = "type")]
    pub actor_type: ActorType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            user_id: None,
            role: None,
            ip: None,
        }
    }

    pub fn api() -> Self {
        Self {
            actor_type: ActorType::Api,
            user_id: None,
            role: None,
            ip: None,
        }
    }

    pub fn human(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::Human,
            user_id: Some(user_id.into()),
            role: Some(role.into()),
            ip: None,
        }
    }

    /// Short description for audit / error messages
    pub fn describe(&self) -> String {
        match (&self.role, &self.user_id) {
            (Some(role), _) => role.clone(),
            (None, Some(user)) => user.clone(),
            (None, None) => self.actor_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActorType {
    System,
    Human,
    Api,
}

/// Uploaded document attached to a case; only ocr_status mutates after upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub case_id: String,
    pub document_type: String,
    pub document_subtype: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub file_path: String,
    pub file_size_bytes: Option<u64>,
    pub mime_type: Option<String>,
    pub ocr_status: OcrStatus,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OcrStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}
