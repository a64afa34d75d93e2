use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use forgecrm_auth::api_key::API_KEY_PREFIX;

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::{CredentialKind, RequestActor};

pub const API_KEY_HEADER: &str = "x-api-key";

/// A credential as presented, before verification.
#[derive(Debug, PartialEq, Eq)]
enum Credential {
    Bearer(String),
    ApiKey(String),
}

/// Resolve the request's credential into an actor, or reject with 401/403.
pub async fn auth_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let request_actor = match extract_credential(req.headers())? {
        Credential::Bearer(token) => RequestActor::new(
            services.verifier.validate_token(&token)?,
            CredentialKind::Token,
        ),
        Credential::ApiKey(raw) => RequestActor::new(
            services.verifier.validate_api_key(&raw).await?,
            CredentialKind::ApiKey,
        ),
    };

    req.extensions_mut().insert(request_actor);
    Ok(next.run(req).await)
}

/// `X-API-Key: fcrm_…`, or `Authorization: Bearer …` carrying either a token
/// or an API key.
fn extract_credential(headers: &HeaderMap) -> Result<Credential, ApiError> {
    if let Some(value) = headers.get(API_KEY_HEADER) {
        let raw = value.to_str().map_err(|_| ApiError::MissingCredentials)?.trim();
        if raw.is_empty() {
            return Err(ApiError::MissingCredentials);
        }
        return Ok(Credential::ApiKey(raw.to_string()));
    }

    let header = headers
        .get(header::AUTHORIZATION)
        .ok_or(ApiError::MissingCredentials)?
        .to_str()
        .map_err(|_| ApiError::MissingCredentials)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::MissingCredentials)?
        .trim();
    if token.is_empty() {
        return Err(ApiError::MissingCredentials);
    }

    if token.starts_with(API_KEY_PREFIX) {
        Ok(Credential::ApiKey(token.to_string()))
    } else {
        Ok(Credential::Bearer(token.to_string()))
    }
}
