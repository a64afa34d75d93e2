//! Record services: the authorization-gated operations on every CRM record.
//!
//! Each operation follows the same pipeline:
//!
//! ```text
//! load record (missing or soft-deleted → NotFound)
//!   ↓
//! authorize(actor, resource, operation, target)
//!   ↓
//! state machine / field validation (apply_update, validated)
//!   ↓
//! referential checks (owner, assignee, linked records)
//!   ↓
//! store write
//! ```
//!
//! Updates write conditionally on the version they were computed from. When
//! a concurrent write wins (a conversion, a completion, a close), the update is
//! recomputed from a fresh read, so the state machine sees the new state and
//! rejects what it must. After [`UPDATE_ATTEMPTS`] lost races the store's
//! `ConditionFailed` is returned as is.
//!
//! Nothing here performs IO directly; the store is injected as `Arc<S>`.

use std::sync::Arc;

use thiserror::Error;

use forgecrm_auth::{AuthzError, User, password};
use forgecrm_core::{DomainError, StoreError, UserId};

use crate::store::CrmStore;

pub mod conversion;
pub mod customers;
pub mod leads;
pub mod tasks;
pub mod tickets;
pub mod users;

pub use users::{CreateUser, UpdateUser};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether the error means "no such record" to the caller.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServiceError::Authz(AuthzError::NotFound)
                | ServiceError::Domain(DomainError::NotFound)
                | ServiceError::Store(StoreError::NotFound)
        )
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// How many times an update is computed before a lost race is reported.
pub const UPDATE_ATTEMPTS: u32 = 3;

/// Settle one conditional write. `None` means the record changed underneath
/// and the update should be recomputed from a fresh read.
fn settle<T>(result: Result<T, StoreError>, attempt: u32, record: &'static str) -> Option<ServiceResult<T>> {
    match result {
        Err(StoreError::ConditionFailed(reason)) if attempt < UPDATE_ATTEMPTS => {
            tracing::debug!(record, attempt, reason = %reason, "record changed during update, retrying");
            None
        }
        other => Some(other.map_err(ServiceError::from)),
    }
}

/// Authorization-gated CRM operations over a store.
///
/// Cheap to clone; clones share the store.
pub struct CrmService<S: ?Sized> {
    store: Arc<S>,
    bcrypt_cost: u32,
}

impl<S: ?Sized> Clone for CrmService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            bcrypt_cost: self.bcrypt_cost,
        }
    }
}

impl<S: ?Sized> std::fmt::Debug for CrmService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrmService")
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish_non_exhaustive()
    }
}

impl<S: CrmStore + ?Sized> CrmService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            bcrypt_cost: password::DEFAULT_COST,
        }
    }

    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The user `id` refers to, which must exist and be active.
    async fn active_user(&self, id: UserId, field: &str) -> ServiceResult<User> {
        match self.store.find_user(id).await? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(DomainError::validation(format!(
                "{field} must reference an active user"
            ))
            .into()),
        }
    }
}

/// Hash `plain` off the async runtime.
async fn hash_password(plain: &str, cost: u32) -> ServiceResult<String> {
    let plain = plain.to_string();
    tokio::task::spawn_blocking(move || password::hash_password(&plain, cost))
        .await
        .map_err(|e| ServiceError::Internal(format!("password hashing task failed: {e}")))?
        .map_err(|e| ServiceError::Internal(format!("password hashing failed: {e}")))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use forgecrm_auth::{Actor, NewUser, Role, UserStore};
    use forgecrm_crm::Contact;

    use super::*;
    use crate::store::InMemoryStore;

    pub fn service() -> CrmService<InMemoryStore> {
        CrmService::new(Arc::new(InMemoryStore::new())).with_bcrypt_cost(4)
    }

    pub async fn actor(service: &CrmService<InMemoryStore>, email: &str, role: Role) -> Actor {
        service
            .store()
            .insert_user(NewUser {
                email: email.to_string(),
                password_hash: "not-a-real-hash".to_string(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                role,
            })
            .await
            .unwrap()
            .actor()
    }

    pub fn contact(first: &str, company: Option<&str>) -> Contact {
        Contact {
            first_name: first.to_string(),
            last_name: "Doe".to_string(),
            email: Some(format!("{}@example.com", first.to_lowercase())),
            phone: Some("555-0100".to_string()),
            company: company.map(str::to_string),
        }
    }
}
