use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::case::short_id;

/// Platform user; managed by the auth collaborator, materialized here for
/// the bootstrap command and queue claiming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub role: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(
        email: impl Into<String>,
        password: &str,
        full_name: Option<String>,
        role: impl Into<String>,
    ) -> Self {
        let user_id = format!("usr_{}", short_id());
        Self {
            hashed_password: hash_password(&user_id, password),
            user_id,
            email: email.into(),
            full_name,
            role: role.into(),
            active: true,
            created_at: Utc::now(),
            last_login: None,
        }
    }

    pub fn verify_password(&self, password: &str) -> bool {
        self.hashed_password == hash_password(&self.user_id, password)
    }
}

/// Salted SHA-256 hex digest; the user id acts as a per-user salt
fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}
