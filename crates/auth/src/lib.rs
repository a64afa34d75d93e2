//! `forgecrm-auth`: identity and authorization boundary.
//!
//! Credential verification (passwords, bearer tokens, API keys) and the
//! role/ownership policy. Decoupled from HTTP; storage is reached only
//! through the ports in [`store`].

pub mod api_key;
pub mod authorize;
pub mod claims;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod store;
pub mod user;
pub mod verifier;

pub use api_key::{ApiKey, IssuedApiKey, NewApiKey};
pub use authorize::{
    AuthorizationExplanation, AuthzError, Decision, DenyReason, ListScope, Target, authorize,
    evaluate, explain, list_scope, policy_matrix,
};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use permissions::{Operation, Permission, ResourceType};
pub use principal::Actor;
pub use roles::Role;
pub use store::{ApiKeyStore, UserStore};
pub use user::{NewUser, User, UserPatch};
pub use verifier::{AuthConfig, AuthError, CredentialVerifier, IssuedToken};
