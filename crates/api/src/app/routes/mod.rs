use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};

use crate::app::services::AppServices;

pub mod api_keys;
pub mod auth;
pub mod policy;
pub mod system;

/// Routes reachable without credentials.
pub fn public() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/auth/login", post(auth::login))
}

/// Routes behind the auth middleware.
pub fn protected() -> Router {
    Router::new()
        .route("/auth/me", get(auth::whoami))
        .route("/auth/api-keys", post(api_keys::create).get(api_keys::list))
        .route("/auth/api-keys/:id", delete(api_keys::revoke))
        .route("/auth/explain", get(policy::explain))
        .route("/admin/policy", get(policy::matrix))
}

pub type Services = axum::Extension<Arc<AppServices>>;
