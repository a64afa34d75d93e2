use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role identifier used for RBAC.
///
/// Closed set: every policy decision matches on all four variants, so adding a
/// role is a compile error until the policy table covers it. Roles do not
/// inherit from each other.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Sales,
    Support,
    Customer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Sales, Role::Support, Role::Customer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Sales => "sales",
            Role::Support => "support",
            Role::Customer => "customer",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::Admin => "Full system administrator",
            Role::Sales => "Sales staff owning leads and managing customers",
            Role::Support => "Support staff working assigned tickets",
            Role::Customer => "End customer with self-service access only",
        }
    }

    /// Roles that may be assigned support tickets.
    pub fn can_take_tickets(&self) -> bool {
        matches!(self, Role::Support | Role::Admin)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "sales" => Ok(Role::Sales),
            "support" => Ok(Role::Support),
            "customer" => Ok(Role::Customer),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_roles_case_insensitively() {
        for role in Role::ALL {
            assert_eq!(role.as_str().to_uppercase().parse::<Role>().unwrap(), role);
        }
        assert!("manager".parse::<Role>().is_err());
    }

    #[test]
    fn serializes_as_lowercase_string() {
        assert_eq!(serde_json::to_string(&Role::Support).unwrap(), "\"support\"");
    }
}
