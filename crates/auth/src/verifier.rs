//! Credential verifier: turns a password, bearer token or API key into an
//! [`Actor`], and manages API keys on behalf of their owners.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use forgecrm_core::email::normalize_email;
use forgecrm_core::{ApiKeyId, DomainError, StoreError, UserId};

use crate::api_key::{
    API_KEY_PREFIX, ApiKey, ApiKeyHasher, IssuedApiKey, NewApiKey, display_prefix, generate_raw_key,
};
use crate::authorize::{AuthzError, Target, authorize, list_scope};
use crate::claims::{JwtClaims, JwtKeys, TokenValidationError};
use crate::password;
use crate::store::{ApiKeyStore, UserStore};
use crate::{Actor, Operation, Permission, ResourceType};

pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 60;

/// Plaintext hashed once at startup so unknown emails still pay for a bcrypt
/// verification.
const DUMMY_PASSWORD: &str = "forgecrm-timing-equaliser";

/// Settings the verifier is built from.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub api_key_pepper: String,
    pub bcrypt_cost: u32,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>, api_key_pepper: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttl: Duration::minutes(DEFAULT_TOKEN_TTL_MINUTES),
            api_key_pepper: api_key_pepper.into(),
            bcrypt_cost: password::DEFAULT_COST,
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }
}

impl core::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .field("api_key_pepper", &"<redacted>")
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("account is disabled")]
    AccountDisabled,

    #[error("invalid token")]
    TokenInvalid,

    #[error("token has expired")]
    TokenExpired,

    #[error("invalid API key")]
    ApiKeyInvalid,

    #[error("API key has expired")]
    ApiKeyExpired,

    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Errors that mean "no trusted identity" (answered with 401).
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::TokenInvalid
                | AuthError::TokenExpired
                | AuthError::ApiKeyInvalid
                | AuthError::ApiKeyExpired
        )
    }
}

impl From<TokenValidationError> for AuthError {
    fn from(err: TokenValidationError) -> Self {
        match err {
            TokenValidationError::Expired => AuthError::TokenExpired,
            TokenValidationError::Invalid(_) => AuthError::TokenInvalid,
        }
    }
}

/// A signed access token handed out by login.
#[derive(Clone, Serialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub actor: Actor,
}

impl core::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("actor", &self.actor)
            .finish()
    }
}

pub struct CredentialVerifier<S: ?Sized> {
    store: Arc<S>,
    keys: Arc<JwtKeys>,
    hasher: Arc<ApiKeyHasher>,
    token_ttl: Duration,
    dummy_hash: Arc<str>,
}

impl<S: ?Sized> Clone for CredentialVerifier<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            keys: Arc::clone(&self.keys),
            hasher: Arc::clone(&self.hasher),
            token_ttl: self.token_ttl,
            dummy_hash: Arc::clone(&self.dummy_hash),
        }
    }
}

impl<S: ?Sized> core::fmt::Debug for CredentialVerifier<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("keys", &self.keys)
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

impl<S> CredentialVerifier<S>
where
    S: UserStore + ApiKeyStore + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, config: &AuthConfig) -> Result<Self, AuthError> {
        if config.jwt_secret.is_empty() {
            return Err(AuthError::Internal("JWT secret must not be empty".to_string()));
        }
        if config.token_ttl <= Duration::zero() {
            return Err(AuthError::Internal("token TTL must be positive".to_string()));
        }
        let hasher = ApiKeyHasher::new(config.api_key_pepper.as_bytes())
            .map_err(|e| AuthError::Internal(format!("invalid API key pepper: {e}")))?;
        let dummy_hash = password::hash_password(DUMMY_PASSWORD, config.bcrypt_cost)
            .map_err(|e| AuthError::Internal(format!("bcrypt setup failed: {e}")))?;

        Ok(Self {
            store,
            keys: Arc::new(JwtKeys::from_secret(config.jwt_secret.as_bytes())),
            hasher: Arc::new(hasher),
            token_ttl: config.token_ttl,
            dummy_hash: Arc::from(dummy_hash),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Email + password login.
    ///
    /// Unknown email and wrong password are indistinguishable to the caller.
    /// The active flag is only consulted once the password has matched.
    #[instrument(skip(self, password), err(level = "debug"))]
    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedToken, AuthError> {
        let email = normalize_email(email);
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            self.check_password(password, &self.dummy_hash).await;
            return Err(AuthError::InvalidCredentials);
        };

        if !self.check_password(password, &user.password_hash).await {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        let now = Utc::now();
        let store = Arc::clone(&self.store);
        let user_id = user.id;
        spawn_best_effort("record_login", async move {
            store.record_login(user_id, now).await
        });

        tracing::info!(user_id = %user.id, role = %user.role, "login succeeded");
        self.issue_token(&user.actor(), &user.email, now)
    }

    /// Sign a fresh token for `actor`.
    pub fn generate_jwt(&self, actor: &Actor, email: &str) -> Result<IssuedToken, AuthError> {
        self.issue_token(actor, email, Utc::now())
    }

    /// Resolve a bearer token. Signature and expiry are checked before any
    /// claim is used.
    pub fn validate_token(&self, token: &str) -> Result<Actor, AuthError> {
        match self.keys.verify(token, Utc::now()) {
            Ok(claims) => Ok(claims.actor()),
            Err(err) => {
                tracing::debug!(error = %err, "bearer token rejected");
                Err(err.into())
            }
        }
    }

    /// Resolve a raw API key by its keyed digest.
    #[instrument(skip_all, err(level = "debug"))]
    pub async fn validate_api_key(&self, raw: &str) -> Result<Actor, AuthError> {
        if !raw.starts_with(API_KEY_PREFIX) {
            return Err(AuthError::ApiKeyInvalid);
        }

        let digest = self.hasher.hash(raw);
        let key = self
            .store
            .find_api_key_by_hash(&digest)
            .await?
            .ok_or(AuthError::ApiKeyInvalid)?;
        if !key.is_active {
            return Err(AuthError::ApiKeyInvalid);
        }

        let now = Utc::now();
        if key.is_expired(now) {
            return Err(AuthError::ApiKeyExpired);
        }

        let user = self
            .store
            .find_user(key.user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::ApiKeyInvalid)?;

        let store = Arc::clone(&self.store);
        let key_id = key.id;
        spawn_best_effort("touch_api_key", async move {
            store.touch_api_key(key_id, now).await
        });

        Ok(user.actor())
    }

    /// Create a key for `owner`. The raw value is only ever returned here.
    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn issue_api_key(
        &self,
        actor: &Actor,
        owner: UserId,
        name: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedApiKey, AuthError> {
        authorize(
            actor,
            ResourceType::ApiKey,
            Operation::Create,
            &Target::ApiKey { owner_id: owner },
        )?;

        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("API key name cannot be empty").into());
        }
        if expires_at.is_some_and(|at| at <= Utc::now()) {
            return Err(DomainError::validation("expires_at must be in the future").into());
        }

        let user = self
            .store
            .find_user(owner)
            .await?
            .ok_or(DomainError::NotFound)?;
        if !user.is_active {
            return Err(DomainError::validation("cannot issue an API key for a disabled account").into());
        }

        let raw = generate_raw_key();
        let key = self
            .store
            .insert_api_key(NewApiKey {
                user_id: owner,
                name: name.to_string(),
                prefix: display_prefix(&raw),
                key_hash: self.hasher.hash(&raw),
                expires_at,
            })
            .await?;

        tracing::info!(key_id = %key.id, user_id = %owner, prefix = %key.prefix, "API key issued");
        Ok(IssuedApiKey { key, raw })
    }

    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn revoke_api_key(&self, actor: &Actor, key_id: ApiKeyId) -> Result<(), AuthError> {
        let key = self
            .store
            .find_api_key(key_id)
            .await?
            .ok_or(AuthzError::NotFound)?;
        authorize(
            actor,
            ResourceType::ApiKey,
            Operation::Delete,
            &Target::ApiKey { owner_id: key.user_id },
        )?;

        self.store.revoke_api_key(key_id).await?;
        tracing::info!(key_id = %key_id, user_id = %key.user_id, "API key revoked");
        Ok(())
    }

    pub async fn list_api_keys(&self, actor: &Actor, owner: UserId) -> Result<Vec<ApiKey>, AuthError> {
        let scope = list_scope(actor, ResourceType::ApiKey)?;
        if !scope.admits(Some(owner), None) {
            return Err(AuthzError::Forbidden(
                Permission::new(ResourceType::ApiKey, Operation::List).to_string(),
            )
            .into());
        }
        Ok(self.store.list_api_keys(owner).await?)
    }

    fn issue_token(&self, actor: &Actor, email: &str, now: DateTime<Utc>) -> Result<IssuedToken, AuthError> {
        let claims = JwtClaims::new(actor, email, now, self.token_ttl);
        let access_token = self
            .keys
            .sign(&claims)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))?;
        Ok(IssuedToken {
            access_token,
            token_type: "Bearer",
            expires_at: now + self.token_ttl,
            actor: *actor,
        })
    }

    async fn check_password(&self, password: &str, hash: &str) -> bool {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || password::verify_password(&password, &hash))
            .await
            .unwrap_or(false)
    }
}

/// Run a write whose failure must not fail the request.
fn spawn_best_effort<F>(operation: &'static str, write: F)
where
    F: Future<Output = Result<(), StoreError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(error) = write.await {
            tracing::warn!(operation, error = %error, "best-effort write failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use crate::user::{NewUser, User};
    use crate::{ListScope, Role};

    const SECRET: &str = "test-secret";

    #[derive(Default)]
    struct TestStore {
        next_id: AtomicU64,
        users: RwLock<Vec<User>>,
        keys: RwLock<Vec<ApiKey>>,
        fail_writes: AtomicBool,
    }

    impl TestStore {
        fn next(&self) -> u64 {
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn set_active(&self, id: UserId, active: bool) {
            let mut users = self.users.write().unwrap();
            users.iter_mut().find(|u| u.id == id).unwrap().is_active = active;
        }

        fn last_login(&self, id: UserId) -> Option<DateTime<Utc>> {
            let users = self.users.read().unwrap();
            users.iter().find(|u| u.id == id).and_then(|u| u.last_login_at)
        }
    }

    #[async_trait::async_trait]
    impl UserStore for TestStore {
        async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
            let user = User {
                id: UserId::new(self.next()),
                email: user.email,
                password_hash: user.password_hash,
                first_name: user.first_name,
                last_name: user.last_name,
                role: user.role,
                is_active: true,
                last_login_at: None,
                created_at: Utc::now(),
            };
            self.users.write().unwrap().push(user.clone());
            Ok(user)
        }

        async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
            Ok(self.users.read().unwrap().iter().find(|u| u.id == id).cloned())
        }

        async fn list_users(&self, scope: ListScope) -> Result<Vec<User>, StoreError> {
            Ok(self
                .users
                .read()
                .unwrap()
                .iter()
                .filter(|u| scope.admits(Some(u.id), None))
                .cloned()
                .collect())
        }

        async fn update_user(&self, current: &User, updated: &User) -> Result<User, StoreError> {
            let mut users = self.users.write().unwrap();
            let slot = users
                .iter_mut()
                .find(|u| u.id == updated.id)
                .ok_or(StoreError::NotFound)?;
            if !slot.same_account(current) {
                return Err(StoreError::ConditionFailed("user changed".to_string()));
            }
            *slot = updated.clone();
            Ok(updated.clone())
        }

        async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            Ok(self.users.read().unwrap().iter().find(|u| u.email == email).cloned())
        }

        async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::backend("connection reset"));
            }
            let mut users = self.users.write().unwrap();
            if let Some(u) = users.iter_mut().find(|u| u.id == id) {
                u.last_login_at = Some(at);
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl ApiKeyStore for TestStore {
        async fn insert_api_key(&self, key: NewApiKey) -> Result<ApiKey, StoreError> {
            let key = ApiKey {
                id: ApiKeyId::new(self.next()),
                user_id: key.user_id,
                name: key.name,
                prefix: key.prefix,
                key_hash: key.key_hash,
                is_active: true,
                expires_at: key.expires_at,
                last_used_at: None,
                created_at: Utc::now(),
            };
            self.keys.write().unwrap().push(key.clone());
            Ok(key)
        }

        async fn find_api_key(&self, id: ApiKeyId) -> Result<Option<ApiKey>, StoreError> {
            Ok(self.keys.read().unwrap().iter().find(|k| k.id == id).cloned())
        }

        async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
            Ok(self
                .keys
                .read()
                .unwrap()
                .iter()
                .find(|k| k.key_hash == key_hash)
                .cloned())
        }

        async fn list_api_keys(&self, user_id: UserId) -> Result<Vec<ApiKey>, StoreError> {
            Ok(self
                .keys
                .read()
                .unwrap()
                .iter()
                .filter(|k| k.user_id == user_id)
                .cloned()
                .collect())
        }

        async fn touch_api_key(&self, id: ApiKeyId, at: DateTime<Utc>) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::backend("connection reset"));
            }
            if let Some(k) = self.keys.write().unwrap().iter_mut().find(|k| k.id == id) {
                k.last_used_at = Some(at);
            }
            Ok(())
        }

        async fn revoke_api_key(&self, id: ApiKeyId) -> Result<(), StoreError> {
            if let Some(k) = self.keys.write().unwrap().iter_mut().find(|k| k.id == id) {
                k.is_active = false;
            }
            Ok(())
        }
    }

    async fn setup() -> (Arc<TestStore>, CredentialVerifier<TestStore>) {
        let store = Arc::new(TestStore::default());
        let config = AuthConfig::new(SECRET, "pepper").with_bcrypt_cost(4);
        let verifier = CredentialVerifier::new(Arc::clone(&store), &config).unwrap();
        (store, verifier)
    }

    async fn add_user(store: &TestStore, email: &str, password: &str, role: Role) -> User {
        store
            .insert_user(NewUser {
                email: email.to_string(),
                password_hash: password::hash_password(password, 4).unwrap(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                role,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn login_issues_a_token_that_resolves_to_the_user() {
        let (store, verifier) = setup().await;
        let user = add_user(&store, "sam@example.com", "hunter22", Role::Sales).await;

        let issued = verifier.login("  SAM@example.com ", "hunter22").await.unwrap();
        assert_eq!(issued.actor, user.actor());
        assert_eq!(verifier.validate_token(&issued.access_token).unwrap(), user.actor());

        for _ in 0..50 {
            if store.last_login(user.id).is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(store.last_login(user.id).is_some());
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let (store, verifier) = setup().await;
        add_user(&store, "sam@example.com", "hunter22", Role::Sales).await;

        let unknown = verifier.login("nobody@example.com", "hunter22").await.unwrap_err();
        let wrong = verifier.login("sam@example.com", "wrong").await.unwrap_err();
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn disabled_account_is_reported_only_after_the_password_matches() {
        let (store, verifier) = setup().await;
        let user = add_user(&store, "sue@example.com", "pa55word", Role::Support).await;
        store.set_active(user.id, false);

        assert!(matches!(
            verifier.login("sue@example.com", "pa55word").await,
            Err(AuthError::AccountDisabled)
        ));
        assert!(matches!(
            verifier.login("sue@example.com", "guess").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn failed_last_login_write_does_not_fail_login() {
        let (store, verifier) = setup().await;
        add_user(&store, "sam@example.com", "hunter22", Role::Sales).await;
        store.fail_writes.store(true, Ordering::SeqCst);

        assert!(verifier.login("sam@example.com", "hunter22").await.is_ok());
    }

    #[tokio::test]
    async fn expired_token_is_distinct_from_bad_signature() {
        let (_store, verifier) = setup().await;
        let actor = Actor::new(UserId::new(1), Role::Admin);
        let now = Utc::now();

        let expired = JwtKeys::from_secret(SECRET.as_bytes())
            .sign(&JwtClaims::new(&actor, "a@example.com", now - Duration::hours(2), Duration::hours(1)))
            .unwrap();
        assert!(matches!(verifier.validate_token(&expired), Err(AuthError::TokenExpired)));

        let forged = JwtKeys::from_secret(b"someone-else")
            .sign(&JwtClaims::new(&actor, "a@example.com", now, Duration::hours(1)))
            .unwrap();
        assert!(matches!(verifier.validate_token(&forged), Err(AuthError::TokenInvalid)));
    }

    #[tokio::test]
    async fn api_key_round_trip_and_revocation() {
        let (store, verifier) = setup().await;
        let user = add_user(&store, "sam@example.com", "hunter22", Role::Sales).await;
        let actor = user.actor();

        let issued = verifier.issue_api_key(&actor, user.id, "ci", None).await.unwrap();
        assert_ne!(issued.key.key_hash, issued.raw);
        assert!(issued.raw.starts_with(&issued.key.prefix));
        assert_eq!(verifier.validate_api_key(&issued.raw).await.unwrap(), actor);

        verifier.revoke_api_key(&actor, issued.key.id).await.unwrap();
        assert!(matches!(
            verifier.validate_api_key(&issued.raw).await,
            Err(AuthError::ApiKeyInvalid)
        ));
    }

    #[tokio::test]
    async fn expired_unknown_and_orphaned_keys_are_rejected() {
        let (store, verifier) = setup().await;
        let user = add_user(&store, "sam@example.com", "hunter22", Role::Sales).await;

        let raw = generate_raw_key();
        store
            .insert_api_key(NewApiKey {
                user_id: user.id,
                name: "old".to_string(),
                prefix: display_prefix(&raw),
                key_hash: verifier.hasher.hash(&raw),
                expires_at: Some(Utc::now() - Duration::minutes(1)),
            })
            .await
            .unwrap();
        assert!(matches!(
            verifier.validate_api_key(&raw).await,
            Err(AuthError::ApiKeyExpired)
        ));

        assert!(matches!(
            verifier.validate_api_key(&generate_raw_key()).await,
            Err(AuthError::ApiKeyInvalid)
        ));
        assert!(matches!(
            verifier.validate_api_key("plainly-wrong").await,
            Err(AuthError::ApiKeyInvalid)
        ));

        let live = verifier
            .issue_api_key(&user.actor(), user.id, "live", None)
            .await
            .unwrap();
        store.set_active(user.id, false);
        assert!(matches!(
            verifier.validate_api_key(&live.raw).await,
            Err(AuthError::ApiKeyInvalid)
        ));
    }

    #[tokio::test]
    async fn api_keys_are_managed_by_their_owner_or_an_admin() {
        let (store, verifier) = setup().await;
        let admin = add_user(&store, "root@example.com", "rootpass", Role::Admin).await;
        let sam = add_user(&store, "sam@example.com", "hunter22", Role::Sales).await;
        let sue = add_user(&store, "sue@example.com", "pa55word", Role::Support).await;

        assert!(matches!(
            verifier.issue_api_key(&sam.actor(), sue.id, "x", None).await,
            Err(AuthError::Authz(AuthzError::Forbidden(_)))
        ));

        let key = verifier
            .issue_api_key(&admin.actor(), sue.id, "ops", None)
            .await
            .unwrap();
        assert_eq!(verifier.list_api_keys(&sue.actor(), sue.id).await.unwrap().len(), 1);
        assert!(matches!(
            verifier.list_api_keys(&sam.actor(), sue.id).await,
            Err(AuthError::Authz(AuthzError::Forbidden(_)))
        ));
        assert!(matches!(
            verifier.revoke_api_key(&sam.actor(), key.key.id).await,
            Err(AuthError::Authz(AuthzError::Forbidden(_)))
        ));
        assert!(matches!(
            verifier.revoke_api_key(&sam.actor(), ApiKeyId::new(999)).await,
            Err(AuthError::Authz(AuthzError::NotFound))
        ));
        verifier.revoke_api_key(&admin.actor(), key.key.id).await.unwrap();
    }
}
