//! Policy audit endpoints: explain a decision, dump the table.

use axum::extract::Query;
use axum::{Extension, Json};

use forgecrm_auth::authorize::PolicyCell;
use forgecrm_auth::{AuthorizationExplanation, AuthzError, Target, explain as explain_decision, policy_matrix};

use crate::app::dto::ExplainQuery;
use crate::app::errors::ApiError;
use crate::context::RequestActor;

/// GET /auth/explain?resource=lead&operation=list
///
/// Explains the collection-level decision for the caller.
pub async fn explain(
    Extension(ctx): Extension<RequestActor>,
    Query(query): Query<ExplainQuery>,
) -> Json<AuthorizationExplanation> {
    Json(explain_decision(ctx.actor(), query.resource, query.operation, &Target::None))
}

/// GET /admin/policy
pub async fn matrix(Extension(ctx): Extension<RequestActor>) -> Result<Json<Vec<PolicyCell>>, ApiError> {
    if !ctx.actor().is_admin() {
        return Err(AuthzError::Forbidden("admin.policy".to_string()).into());
    }
    Ok(Json(policy_matrix()))
}
