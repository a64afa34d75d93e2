use serde::Serialize;

use forgecrm_auth::Actor;

/// How the caller proved its identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Token,
    ApiKey,
}

/// Authenticated identity for a request, inserted by the auth middleware.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestActor {
    actor: Actor,
    credential: CredentialKind,
}

impl RequestActor {
    pub fn new(actor: Actor, credential: CredentialKind) -> Self {
        Self { actor, credential }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn credential(&self) -> CredentialKind {
        self.credential
    }
}
