use std::sync::Arc;

use axum::{Json, Router, extract::Extension, routing::get};
use serde::{Deserialize, Serialize};
use shared::models::MemberProfile;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::auth::CurrentMember,
    services::MessagingError,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/members/me", get(current_member).put(update_profile))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemberSummary {
    pub profile: MemberProfile,
    pub rooms: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

#[instrument(skip(app_state))]
async fn current_member(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
) -> AppResult<Json<MemberSummary>> {
    let profile = app_state
        .members
        .resolve_member(member)
        .await
        .map_err(MessagingError::from)?
        .ok_or_else(|| ApiError::not_found(format!("member {member} has no profile")))?;
    let rooms = app_state
        .members
        .rooms_of(member)
        .await
        .map_err(MessagingError::from)?;
    Ok(Json(MemberSummary { profile, rooms }))
}

/// Creates or replaces the caller's display fields.
#[instrument(skip(app_state, payload))]
async fn update_profile(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<MemberProfile>> {
    let username = payload.username.trim();
    if username.is_empty() {
        return Err(MessagingError::Validation("username must not be empty".into()).into());
    }
    let profile = MemberProfile {
        id: member,
        username: username.to_string(),
        email: payload.email,
        picture: payload.picture,
    };
    let stored = app_state
        .members
        .upsert_member(profile)
        .await
        .map_err(MessagingError::from)?;
    Ok(Json(stored))
}
