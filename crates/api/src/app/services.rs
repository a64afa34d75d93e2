//! Service wiring: pick a store and build the verifier and record services on it.

use std::sync::Arc;

use forgecrm_auth::{AuthConfig, AuthError, CredentialVerifier, NewUser, Role, password};
use forgecrm_core::StoreError;
use forgecrm_infra::{CrmService, CrmStore, InMemoryStore, PostgresStore};

use crate::config::{AppConfig, BootstrapAdmin};

/// Everything a handler needs, shared behind one `Arc`.
#[derive(Debug)]
pub struct AppServices {
    pub verifier: CredentialVerifier<dyn CrmStore>,
    pub crm: CrmService<dyn CrmStore>,
}

impl AppServices {
    pub fn new(store: Arc<dyn CrmStore>, auth: &AuthConfig) -> Result<Self, AuthError> {
        Ok(Self {
            verifier: CredentialVerifier::new(Arc::clone(&store), auth)?,
            crm: CrmService::new(store).with_bcrypt_cost(auth.bcrypt_cost),
        })
    }

    /// Services over a fresh in-memory store (dev and tests).
    pub fn in_memory(auth: &AuthConfig) -> Result<Self, AuthError> {
        Self::new(Arc::new(InMemoryStore::new()), auth)
    }
}

/// Build the services described by `config`, connecting to Postgres when a
/// database URL is configured.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<Arc<AppServices>> {
    let store: Arc<dyn CrmStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("using postgres store");
            Arc::new(PostgresStore::connect(url).await?)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store, data is lost on exit");
            Arc::new(InMemoryStore::new())
        }
    };

    if let Some(admin) = &config.bootstrap_admin {
        ensure_admin(store.as_ref(), admin, config.bcrypt_cost).await?;
    }

    Ok(Arc::new(AppServices::new(store, &config.auth_config())?))
}

/// Create the bootstrap administrator unless the email is already taken.
async fn ensure_admin(store: &dyn CrmStore, admin: &BootstrapAdmin, cost: u32) -> anyhow::Result<()> {
    let plain = admin.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&plain, cost)).await??;
    let new = NewUser {
        email: admin.email.clone(),
        password_hash,
        first_name: "Admin".to_string(),
        last_name: String::new(),
        role: Role::Admin,
    }
    .validated()?;

    match store.insert_user(new).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, "bootstrap admin created");
            Ok(())
        }
        Err(StoreError::UniqueViolation(_)) => {
            tracing::debug!("bootstrap admin already exists");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use forgecrm_auth::UserStore;

    use super::*;

    #[tokio::test]
    async fn bootstrap_admin_is_created_once() {
        let store = InMemoryStore::new();
        let admin = BootstrapAdmin {
            email: "Root@Example.com".to_string(),
            password: "change-me-now".to_string(),
        };

        ensure_admin(&store, &admin, 4).await.unwrap();
        ensure_admin(&store, &admin, 4).await.unwrap();

        let user = store.find_user_by_email("root@example.com").await.unwrap().unwrap();
        assert_eq!(user.role, Role::Admin);
        assert!(password::verify_password("change-me-now", &user.password_hash));
    }
}
