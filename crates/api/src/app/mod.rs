//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and service construction
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: error kind → status mapping

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router over `services`.
pub fn build_app(services: Arc<AppServices>) -> Router {
    let protected = routes::protected().layer(axum::middleware::from_fn_with_state(
        Arc::clone(&services),
        middleware::auth_middleware,
    ));

    routes::public()
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
