use std::{io, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    routing::post,
};
use futures::{StreamExt, TryStreamExt};
use shared::models::Media;
use tracing::instrument;

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::auth::CurrentMember,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/media", post(upload_media))
}

/// Streams the raw request body to media storage.
#[instrument(skip(app_state, headers, body))]
async fn upload_media(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
    headers: HeaderMap,
    body: Body,
) -> AppResult<(StatusCode, Json<Media>)> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Content-Type header is required"))?;

    let stream = body.into_data_stream().map_err(io::Error::other).boxed();
    let media = app_state.media.store(member, content_type, stream).await?;
    Ok((StatusCode::CREATED, Json(media)))
}
