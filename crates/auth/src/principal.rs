use serde::{Deserialize, Serialize};

use forgecrm_core::UserId;

use crate::Role;

/// The authenticated identity attached to a request.
///
/// Derived per request from a verified token or API key and never persisted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is(&self, user_id: UserId) -> bool {
        self.id == user_id
    }
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", self.role, self.id)
    }
}
