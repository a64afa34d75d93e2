use axum::{Extension, Json};

use forgecrm_auth::IssuedToken;

use super::Services;
use crate::app::dto::{LoginRequest, WhoAmI};
use crate::app::errors::ApiError;
use crate::context::RequestActor;

/// POST /auth/login
pub async fn login(
    Extension(services): Services,
    Json(body): Json<LoginRequest>,
) -> Result<Json<IssuedToken>, ApiError> {
    let token = services.verifier.login(&body.email, &body.password).await?;
    Ok(Json(token))
}

/// GET /auth/me
pub async fn whoami(
    Extension(services): Services,
    Extension(ctx): Extension<RequestActor>,
) -> Result<Json<WhoAmI>, ApiError> {
    let actor = ctx.actor();
    let user = services.crm.get_user(actor, actor.id).await?;
    Ok(Json(WhoAmI::new(&user, ctx.credential())))
}
