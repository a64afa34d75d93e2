//! User records: the identities credentials resolve to.

use chrono::{DateTime, Utc};
use serde::Serialize;

use forgecrm_core::email::{is_plausible_email, normalize_email};
use forgecrm_core::{DomainError, DomainResult, Entity, UserId};

use crate::{Actor, Role};

/// A stored user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn actor(&self) -> Actor {
        Actor::new(self.id, self.role)
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// Whether the fields an update writes are the same in both records.
    /// Login bookkeeping is ignored.
    pub fn same_account(&self, other: &User) -> bool {
        self.id == other.id
            && self.password_hash == other.password_hash
            && self.first_name == other.first_name
            && self.last_name == other.last_name
            && self.role == other.role
            && self.is_active == other.is_active
    }

    /// Apply `patch`, returning the updated record. Nothing changes on error.
    pub fn apply_update(&self, patch: &UserPatch) -> DomainResult<User> {
        let first_name = match &patch.first_name {
            Some(name) if name.trim().is_empty() => {
                return Err(DomainError::validation("first name cannot be empty"));
            }
            Some(name) => name.trim().to_string(),
            None => self.first_name.clone(),
        };

        Ok(User {
            first_name,
            last_name: patch
                .last_name
                .as_deref()
                .map_or_else(|| self.last_name.clone(), |n| n.trim().to_string()),
            password_hash: patch
                .password_hash
                .clone()
                .unwrap_or_else(|| self.password_hash.clone()),
            role: patch.role.unwrap_or(self.role),
            is_active: patch.is_active.unwrap_or(self.is_active),
            ..self.clone()
        })
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> UserId {
        self.id
    }
}

/// Partial account update. The password arrives already hashed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

impl UserPatch {
    /// Whether the patch touches fields only an administrator may change.
    pub fn is_privileged(&self) -> bool {
        self.role.is_some() || self.is_active.is_some()
    }
}

/// Insert payload for a new account; the password is already hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

impl NewUser {
    /// Normalise and validate the payload.
    pub fn validated(mut self) -> DomainResult<Self> {
        self.email = normalize_email(&self.email);
        if !is_plausible_email(&self.email) {
            return Err(DomainError::validation("invalid email format"));
        }
        self.first_name = self.first_name.trim().to_string();
        self.last_name = self.last_name.trim().to_string();
        if self.first_name.is_empty() {
            return Err(DomainError::validation("first name cannot be empty"));
        }
        if self.password_hash.is_empty() {
            return Err(DomainError::validation("password hash cannot be empty"));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "$2b$04$hash".to_string(),
            first_name: " Alice ".to_string(),
            last_name: "Smith".to_string(),
            role: Role::Sales,
        }
    }

    #[test]
    fn validated_normalises_email_and_names() {
        let user = new_user("  Alice@Example.COM ").validated().unwrap();
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.first_name, "Alice");
    }

    #[test]
    fn update_trims_names_and_rejects_blank_first_name() {
        let user = User {
            id: UserId::new(1),
            email: "alice@example.com".to_string(),
            password_hash: "old".to_string(),
            first_name: "Alice".to_string(),
            last_name: "Smith".to_string(),
            role: Role::Sales,
            is_active: true,
            last_login_at: None,
            created_at: Utc::now(),
        };

        let patch = UserPatch {
            last_name: Some(" Jones ".to_string()),
            ..UserPatch::default()
        };
        assert!(!patch.is_privileged());
        let updated = user.apply_update(&patch).unwrap();
        assert_eq!(updated.last_name, "Jones");
        assert_eq!(updated.password_hash, "old");

        let blank = UserPatch {
            first_name: Some("  ".to_string()),
            ..UserPatch::default()
        };
        assert!(user.apply_update(&blank).is_err());
    }

    #[test]
    fn rejects_malformed_email() {
        for email in ["invalid-email", "@example.com", "a@b", "a@b@c.com"] {
            assert!(matches!(
                new_user(email).validated(),
                Err(DomainError::Validation(_))
            ));
        }
    }
}
