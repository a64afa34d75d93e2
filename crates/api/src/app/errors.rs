//! Error kind → HTTP status mapping.
//!
//! Every failure leaves the API as `{ "error": code, "message": text }`.
//! Backend failures are logged and replaced with a generic message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use forgecrm_auth::{AuthError, AuthzError};
use forgecrm_core::{DomainError, StoreError};
use forgecrm_infra::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or malformed credentials")]
    MissingCredentials,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        ApiError::Service(err.into())
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Service(err.into())
    }
}

type Parts = (StatusCode, &'static str, String);

fn authz_parts(err: &AuthzError) -> Parts {
    let status = match err {
        AuthzError::Forbidden(_) | AuthzError::SelfDeletionForbidden | AuthzError::UnsupportedOperation(_) => {
            StatusCode::FORBIDDEN
        }
        AuthzError::LeadOwnerRequired => StatusCode::BAD_REQUEST,
        AuthzError::NotFound => StatusCode::NOT_FOUND,
    };
    let code = match err {
        AuthzError::Forbidden(_) => "forbidden",
        AuthzError::SelfDeletionForbidden => "self_deletion_forbidden",
        AuthzError::UnsupportedOperation(_) => "unsupported_operation",
        AuthzError::LeadOwnerRequired => "lead_owner_required",
        AuthzError::NotFound => "not_found",
    };
    (status, code, err.to_string())
}

fn domain_parts(err: &DomainError) -> Parts {
    let code = match err {
        DomainError::NotFound => return (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        DomainError::Validation(_) => "validation_error",
        DomainError::InvalidTransition(_) => "invalid_transition",
        DomainError::ConflictingLink => "conflicting_link",
        DomainError::AlreadyConverted => "already_converted",
        DomainError::InvalidId(_) => "invalid_id",
    };
    (StatusCode::BAD_REQUEST, code, err.to_string())
}

fn store_parts(err: &StoreError) -> Parts {
    match err {
        StoreError::NotFound => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        StoreError::UniqueViolation(_) => (
            StatusCode::CONFLICT,
            "conflict",
            "a record with the same unique value already exists".to_string(),
        ),
        StoreError::ConditionFailed(_) => (
            StatusCode::CONFLICT,
            "conflict",
            "the record changed concurrently".to_string(),
        ),
        StoreError::Backend(_) => internal(err),
    }
}

fn internal(err: &dyn std::fmt::Display) -> Parts {
    tracing::error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal server error".to_string(),
    )
}

impl ApiError {
    fn parts(&self) -> Parts {
        match self {
            ApiError::MissingCredentials => (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            ApiError::Auth(err) => match err {
                AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials", err.to_string()),
                AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "token_expired", err.to_string()),
                AuthError::TokenInvalid => (StatusCode::UNAUTHORIZED, "token_invalid", err.to_string()),
                AuthError::ApiKeyInvalid => (StatusCode::UNAUTHORIZED, "api_key_invalid", err.to_string()),
                AuthError::ApiKeyExpired => (StatusCode::UNAUTHORIZED, "api_key_expired", err.to_string()),
                AuthError::AccountDisabled => (StatusCode::FORBIDDEN, "account_disabled", err.to_string()),
                AuthError::Authz(inner) => authz_parts(inner),
                AuthError::Domain(inner) => domain_parts(inner),
                AuthError::Store(inner) => store_parts(inner),
                AuthError::Internal(_) => internal(err),
            },
            ApiError::Service(err) => match err {
                ServiceError::Authz(inner) => authz_parts(inner),
                ServiceError::Domain(inner) => domain_parts(inner),
                ServiceError::Store(inner) => store_parts(inner),
                ServiceError::Internal(_) => internal(err),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        json_error(status, code, message)
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
