//! Storage ports the credential verifier depends on.
//!
//! Implemented by the in-memory and Postgres stores in `forgecrm-infra`.

use chrono::{DateTime, Utc};

use forgecrm_core::{ApiKeyId, StoreError, UserId};

use crate::api_key::{ApiKey, NewApiKey};
use crate::authorize::ListScope;
use crate::user::{NewUser, User};

#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a validated account. Duplicate emails fail with `UniqueViolation`.
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Users visible under `scope`, ordered by id.
    async fn list_users(&self, scope: ListScope) -> Result<Vec<User>, StoreError>;

    /// Replace the mutable fields of an account, provided they still match
    /// `current`; otherwise `ConditionFailed` and nothing is written.
    /// `last_login_at` is not compared.
    async fn update_user(&self, current: &User, updated: &User) -> Result<User, StoreError>;

    /// Lookup by normalised email.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert_api_key(&self, key: NewApiKey) -> Result<ApiKey, StoreError>;

    async fn find_api_key(&self, id: ApiKeyId) -> Result<Option<ApiKey>, StoreError>;

    /// Lookup by keyed digest; the only way a presented key is resolved.
    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError>;

    /// Keys owned by `user_id`, newest first.
    async fn list_api_keys(&self, user_id: UserId) -> Result<Vec<ApiKey>, StoreError>;

    async fn touch_api_key(&self, id: ApiKeyId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Mark a key inactive. Revoking an already revoked key is a no-op.
    async fn revoke_api_key(&self, id: ApiKeyId) -> Result<(), StoreError>;
}
