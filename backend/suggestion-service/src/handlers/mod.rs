/// Suggestion API Handlers
///
/// HTTP endpoints for the follow-suggestion engine.
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::domain::{DisplayEntry, RelationshipAction, RelationshipKind};
use crate::error::{AppError, Result};
use crate::services::SuggestionEngine;

/// Query parameters for GET /suggestions
#[derive(Debug, Deserialize)]
pub struct SuggestionQuery {
    /// Number of suggestions to return (default: configured display count)
    pub limit: Option<usize>,
}

/// Suggestions response
#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    /// Display subset in serving order
    pub suggestions: Vec<DisplayEntry>,

    /// Total count returned
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub status: &'static str,
}

/// Body of the internal relationship-change hook
#[derive(Debug, Deserialize)]
pub struct RelationshipChangedRequest {
    pub from_user: Uuid,
    pub to_user: Uuid,
    pub kind: RelationshipKind,
    pub action: RelationshipAction,
}

/// Handler state for the suggestion engine
pub struct SuggestionHandlerState {
    pub engine: Arc<SuggestionEngine>,
    /// Shared secret expected in `x-service-token` on internal routes.
    /// Unset means the check is disabled (local development).
    pub internal_service_token: Option<String>,
}

/// GET /api/v1/users/{user_id}/suggestions
/// Display subset for one user; rebuilds inline on first view.
#[get("/api/v1/users/{user_id}/suggestions")]
pub async fn get_suggestions(
    path: web::Path<Uuid>,
    query: web::Query<SuggestionQuery>,
    state: web::Data<SuggestionHandlerState>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();

    debug!(
        "Getting suggestions for user: {}, limit: {:?}",
        user_id, query.limit
    );

    match state.engine.get_suggestions(user_id, query.limit).await {
        Ok(suggestions) => {
            let count = suggestions.len();
            Ok(HttpResponse::Ok().json(SuggestionsResponse { suggestions, count }))
        }
        Err(err) => {
            error!("Failed to get suggestions for {}: {:?}", user_id, err);
            Err(err)
        }
    }
}

/// POST /api/v1/users/{user_id}/suggestions/refresh
/// Forced non-deduped rebuild, for use after explicit user actions.
#[post("/api/v1/users/{user_id}/suggestions/refresh")]
pub async fn refresh_suggestions(
    path: web::Path<Uuid>,
    state: web::Data<SuggestionHandlerState>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();

    debug!("Forced suggestion refresh for user: {}", user_id);

    match state.engine.refresh(user_id).await {
        Ok(_) => Ok(HttpResponse::Accepted().json(RefreshResponse {
            status: "refreshed",
        })),
        Err(err) => {
            error!("Failed to refresh suggestions for {}: {:?}", user_id, err);
            Err(err)
        }
    }
}

/// POST /internal/v1/relationships/changed
/// Invoked by the relationship-management service on every follow or
/// close-friend edge change.
#[post("/internal/v1/relationships/changed")]
pub async fn relationship_changed(
    req: HttpRequest,
    body: web::Json<RelationshipChangedRequest>,
    state: web::Data<SuggestionHandlerState>,
) -> Result<HttpResponse> {
    check_service_token(&req, state.internal_service_token.as_deref())?;

    let change = body.into_inner();
    if change.from_user == change.to_user {
        return Err(AppError::Validation(
            "from_user and to_user must differ".to_string(),
        ));
    }

    state
        .engine
        .on_relationship_changed(change.from_user, change.to_user, change.kind, change.action)
        .await?;

    Ok(HttpResponse::Accepted().json(RefreshResponse { status: "accepted" }))
}

fn check_service_token(req: &HttpRequest, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let provided = req
        .headers()
        .get("x-service-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if provided != expected {
        return Err(AppError::Unauthorized("Invalid service token".to_string()));
    }

    Ok(())
}
