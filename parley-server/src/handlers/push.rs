use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    routing::post,
};
use serde_json::{Value, json};
use shared::models::{PushSubscription, SubscribeOutcome};
use tracing::instrument;

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::auth::CurrentMember,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/api/push/subscriptions",
        post(subscribe).delete(unsubscribe),
    )
}

#[instrument(skip(app_state, subscription))]
async fn subscribe(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
    Json(subscription): Json<PushSubscription>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let outcome = app_state.push.subscribe(member, subscription).await?;
    let status = match outcome {
        SubscribeOutcome::Created => StatusCode::CREATED,
        SubscribeOutcome::AlreadyExists => StatusCode::OK,
    };
    Ok((status, Json(json!({ "outcome": outcome }))))
}

#[instrument(skip(app_state, subscription))]
async fn unsubscribe(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
    Json(subscription): Json<PushSubscription>,
) -> AppResult<StatusCode> {
    if app_state.push.unsubscribe(member, &subscription).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("push subscription not found"))
    }
}
