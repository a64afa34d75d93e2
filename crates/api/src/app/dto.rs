//! Request/response bodies for the auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgecrm_auth::{ApiKey, Operation, ResourceType, Role, User};
use forgecrm_core::UserId;

use crate::context::CredentialKind;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub user_id: UserId,
    pub role: Role,
    pub email: String,
    pub name: String,
    pub credential: CredentialKind,
}

impl WhoAmI {
    pub fn new(user: &User, credential: CredentialKind) -> Self {
        Self {
            user_id: user.id,
            role: user.role,
            email: user.email.clone(),
            name: user.display_name(),
            credential,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    /// Defaults to the caller.
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Returned once at creation; `key` is never shown again.
#[derive(Serialize)]
pub struct CreatedApiKey {
    pub api_key: ApiKey,
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub resource: ResourceType,
    pub operation: Operation,
}
