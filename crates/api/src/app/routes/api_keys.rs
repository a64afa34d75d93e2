use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::{Extension, Json};

use forgecrm_auth::ApiKey;
use forgecrm_core::ApiKeyId;

use super::Services;
use crate::app::dto::{CreateApiKeyRequest, CreatedApiKey, OwnerQuery};
use crate::app::errors::ApiError;
use crate::context::RequestActor;

/// POST /auth/api-keys
pub async fn create(
    Extension(services): Services,
    Extension(ctx): Extension<RequestActor>,
    Json(body): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreatedApiKey>), ApiError> {
    let actor = ctx.actor();
    let owner = body.user_id.unwrap_or(actor.id);
    let issued = services
        .verifier
        .issue_api_key(actor, owner, &body.name, body.expires_at)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedApiKey {
            api_key: issued.key,
            key: issued.raw,
        }),
    ))
}

/// GET /auth/api-keys?user_id=
pub async fn list(
    Extension(services): Services,
    Extension(ctx): Extension<RequestActor>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<ApiKey>>, ApiError> {
    let actor = ctx.actor();
    let owner = query.user_id.unwrap_or(actor.id);
    Ok(Json(services.verifier.list_api_keys(actor, owner).await?))
}

/// DELETE /auth/api-keys/:id
pub async fn revoke(
    Extension(services): Services,
    Extension(ctx): Extension<RequestActor>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: ApiKeyId = id.parse()?;
    services.verifier.revoke_api_key(ctx.actor(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
