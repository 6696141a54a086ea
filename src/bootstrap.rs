use std::sync::Arc;

use crate::error::Result;
use crate::models::{default_kyc_policy, User};
use crate::policy::PolicyEngine;
use crate::state::UserStore;

/// Outcome of a bootstrap run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapReport {
    pub admin_created: bool,
    pub policy_created: bool,
}

pub const DEFAULT_ADMIN_EMAIL: &str = "admin@example.com";
const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

/// Idempotently create the default admin user and the default KYC policy.
/// Safe to run on every startup and from the CLI bootstrap command.
pub async fn ensure_defaults(
    users: Arc<dyn UserStore>,
    policy_engine: &PolicyEngine,
) -> Result<BootstrapReport> {
    let admin_created = match users.find_user_by_email(DEFAULT_ADMIN_EMAIL).await? {
        Some(_) => {
            tracing::info!("Admin user already exists");
            false
        }
        None => {
            let admin = User::new(
                DEFAULT_ADMIN_EMAIL,
                DEFAULT_ADMIN_PASSWORD,
                Some("System Administrator".to_string()),
                "admin",
            );
            users.save_user(&admin).await?;
            tracing::warn!(
                email = DEFAULT_ADMIN_EMAIL,
                "Created admin user with the default password; change it immediately"
            );
            true
        }
    };

    let policy_created = match policy_engine.active_policy("kyc").await {
        Ok(_) => {
            tracing::info!("Default policy already exists");
            false
        }
        Err(_) => {
            policy_engine.publish_policy(default_kyc_policy()).await?;
            tracing::info!("Created default KYC policy");
            true
        }
    };

    Ok(BootstrapReport {
        admin_created,
        policy_created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::state::InMemoryStore;

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let engine = PolicyEngine::new(store.clone(), audit, 60);

        let first = ensure_defaults(store.clone(), &engine).await.unwrap();
        assert!(first.admin_created);
        assert!(first.policy_created);

        let second = ensure_defaults(store.clone(), &engine).await.unwrap();
        assert!(!second.admin_created);
        assert!(!second.policy_created);

        let admin = store
            .find_user_by_email(DEFAULT_ADMIN_EMAIL)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admin.role, "admin");
        assert!(admin.verify_password("admin123"));

        let policy = engine.active_policy("kyc").await.unwrap();
        assert_eq!(policy.policy_id, "pol_kyc_v1");
    }
}
