//! Account management. Deleting an account deactivates it.

use serde::Deserialize;
use tracing::instrument;

use forgecrm_auth::{
    Actor, AuthzError, NewUser, Operation, Permission, ResourceType, Role, Target, User, UserPatch,
    authorize, list_scope,
};
use forgecrm_core::{DomainError, UserId};

use super::{CrmService, ServiceResult, hash_password, settle};
use crate::store::CrmStore;

const MIN_PASSWORD_LEN: usize = 8;

/// Account creation request carrying the plaintext password.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub password: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub role: Role,
}

impl std::fmt::Debug for CreateUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateUser")
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Account update request. `role` and `is_active` are admin-only.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UpdateUser {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

impl std::fmt::Debug for UpdateUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateUser")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("role", &self.role)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

fn check_password_strength(password: &str) -> Result<(), DomainError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(DomainError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

impl<S: CrmStore + ?Sized> CrmService<S> {
    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn list_users(&self, actor: &Actor) -> ServiceResult<Vec<User>> {
        let scope = list_scope(actor, ResourceType::User)?;
        Ok(self.store.list_users(scope).await?)
    }

    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn get_user(&self, actor: &Actor, id: UserId) -> ServiceResult<User> {
        authorize(actor, ResourceType::User, Operation::Get, &Target::User { id })?;
        self.load_user(id).await
    }

    #[instrument(skip(self, actor, request), fields(actor = %actor, email = %request.email), err(level = "debug"))]
    pub async fn create_user(&self, actor: &Actor, request: CreateUser) -> ServiceResult<User> {
        authorize(actor, ResourceType::User, Operation::Create, &Target::None)?;
        check_password_strength(&request.password)?;

        let password_hash = hash_password(&request.password, self.bcrypt_cost).await?;
        let new = NewUser {
            email: request.email,
            password_hash,
            first_name: request.first_name,
            last_name: request.last_name,
            role: request.role,
        }
        .validated()?;

        let created = self.store.insert_user(new).await?;
        tracing::info!(user_id = %created.id, role = %created.role, "user created");
        Ok(created)
    }

    /// Update an account. Users may edit their own names and password; role
    /// and activation changes need an admin, and nobody may deactivate
    /// themselves.
    ///
    /// The decision depends only on `id`, so it is made before the account is
    /// read and a denied caller cannot tell existing ids from unused ones.
    #[instrument(skip(self, actor, request), fields(actor = %actor), err(level = "debug"))]
    pub async fn update_user(&self, actor: &Actor, id: UserId, request: UpdateUser) -> ServiceResult<User> {
        authorize(actor, ResourceType::User, Operation::Update, &Target::User { id })?;

        let mut patch = UserPatch {
            first_name: request.first_name,
            last_name: request.last_name,
            password_hash: None,
            role: request.role,
            is_active: request.is_active,
        };
        if patch.is_privileged() && !actor.is_admin() {
            return Err(AuthzError::Forbidden(
                Permission::new(ResourceType::User, Operation::Update).to_string(),
            )
            .into());
        }
        if patch.is_active == Some(false) && id == actor.id {
            return Err(AuthzError::SelfDeletionForbidden.into());
        }
        if let Some(password) = request.password {
            check_password_strength(&password)?;
            patch.password_hash = Some(hash_password(&password, self.bcrypt_cost).await?);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let user = self.load_user(id).await?;
            let updated = user.apply_update(&patch)?;
            if let Some(done) = settle(self.store.update_user(&user, &updated).await, attempt, "user") {
                return done;
            }
        }
    }

    /// Deactivate an account. Accounts are never removed.
    #[instrument(skip(self, actor), fields(actor = %actor), err(level = "debug"))]
    pub async fn delete_user(&self, actor: &Actor, id: UserId) -> ServiceResult<()> {
        authorize(actor, ResourceType::User, Operation::Delete, &Target::User { id })?;

        let deactivate = UserPatch {
            is_active: Some(false),
            ..UserPatch::default()
        };
        let mut attempt = 0;
        loop {
            attempt += 1;
            let user = self.load_user(id).await?;
            let deactivated = user.apply_update(&deactivate)?;
            if let Some(done) = settle(self.store.update_user(&user, &deactivated).await, attempt, "user") {
                done?;
                tracing::info!(user_id = %id, "user deactivated");
                return Ok(());
            }
        }
    }

    async fn load_user(&self, id: UserId) -> ServiceResult<User> {
        Ok(self.store.find_user(id).await?.ok_or(DomainError::NotFound)?)
    }
}
