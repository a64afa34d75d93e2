//! Contact details shared by leads and customers.

use serde::{Deserialize, Serialize};

use forgecrm_core::email::{is_plausible_email, normalize_email};
use forgecrm_core::{DomainError, DomainResult};

/// Name, email, phone and company of a person.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contact {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
}

impl Contact {
    /// Trim every field, lower-case the email and check the required ones.
    pub fn validated(self) -> DomainResult<Self> {
        let email = match optional(self.email) {
            Some(email) => {
                let email = normalize_email(&email);
                if !is_plausible_email(&email) {
                    return Err(DomainError::validation("invalid email format"));
                }
                Some(email)
            }
            None => None,
        };

        Ok(Self {
            first_name: required("first_name", &self.first_name)?,
            last_name: required("last_name", &self.last_name)?,
            email,
            phone: optional(self.phone),
            company: optional(self.company),
        })
    }

    /// Apply an update. `Some("")` clears an optional field; names cannot be cleared.
    pub fn patched(&self, patch: &ContactPatch) -> DomainResult<Self> {
        Self {
            first_name: patch.first_name.clone().unwrap_or_else(|| self.first_name.clone()),
            last_name: patch.last_name.clone().unwrap_or_else(|| self.last_name.clone()),
            email: patch.email.clone().or_else(|| self.email.clone()),
            phone: patch.phone.clone().or_else(|| self.phone.clone()),
            company: patch.company.clone().or_else(|| self.company.clone()),
        }
        .validated()
    }

    /// Merge for conversion: a non-empty override wins, anything else keeps
    /// the current value.
    pub fn merged_with(&self, overrides: &ContactPatch) -> DomainResult<Self> {
        Self {
            first_name: non_empty(&overrides.first_name)
                .map_or_else(|| self.first_name.clone(), str::to_string),
            last_name: non_empty(&overrides.last_name)
                .map_or_else(|| self.last_name.clone(), str::to_string),
            email: merge(&overrides.email, &self.email),
            phone: merge(&overrides.phone, &self.phone),
            company: merge(&overrides.company, &self.company),
        }
        .validated()
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Partial contact update; also used as conversion overrides.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
}

impl ContactPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub(crate) fn required(field: &str, value: &str) -> DomainResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    Ok(value.to_string())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn merge(value: &Option<String>, current: &Option<String>) -> Option<String> {
    non_empty(value).map(str::to_string).or_else(|| current.clone())
}

pub(crate) fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
