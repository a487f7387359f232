use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Response,
    routing::{delete, get, post},
};
use shared::models::{CreateRoomRequest, PageQuery, PostMessageRequest, ThreadView};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    app_state::AppState, handlers::conversations::history, http::error::AppResult,
    middleware::auth::CurrentMember,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/rooms", get(list_rooms).post(create_room))
        .route("/api/rooms/{room_id}", delete(delete_room))
        .route("/api/rooms/{room_id}/join", post(join_room))
        .route("/api/rooms/{room_id}/leave", post(leave_room))
        .route(
            "/api/rooms/{room_id}/messages",
            get(room_messages).post(post_room_message),
        )
}

#[instrument(skip(app_state))]
async fn list_rooms(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
) -> AppResult<Json<Vec<ThreadView>>> {
    Ok(Json(app_state.rooms.list_rooms(member).await?))
}

#[instrument(skip(app_state, payload))]
async fn create_room(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
    Json(payload): Json<CreateRoomRequest>,
) -> AppResult<(StatusCode, Json<ThreadView>)> {
    let (room, events) = app_state
        .rooms
        .create_room(member, payload.name, payload.members)
        .await?;
    app_state.events.dispatch(events).await;
    Ok((StatusCode::CREATED, Json(room)))
}

#[instrument(skip(app_state))]
async fn delete_room(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
    Path(room_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let events = app_state.rooms.delete_room(room_id, member).await?;
    app_state.events.dispatch(events).await;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(app_state))]
async fn join_room(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
    Path(room_id): Path<Uuid>,
) -> AppResult<Json<ThreadView>> {
    let (room, events) = app_state.rooms.join_room(room_id, member).await?;
    app_state.events.dispatch(events).await;
    Ok(Json(room))
}

#[instrument(skip(app_state))]
async fn leave_room(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
    Path(room_id): Path<Uuid>,
) -> AppResult<Json<ThreadView>> {
    let (room, events) = app_state.rooms.leave_room(room_id, member).await?;
    app_state.events.dispatch(events).await;
    Ok(Json(room))
}

#[instrument(skip(app_state, payload))]
async fn post_room_message(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
    Path(room_id): Path<Uuid>,
    Json(payload): Json<PostMessageRequest>,
) -> AppResult<(StatusCode, Json<ThreadView>)> {
    let (room, events) = app_state
        .rooms
        .post(room_id, member, payload.body, payload.media)
        .await?;
    app_state.events.dispatch(events).await;
    Ok((StatusCode::CREATED, Json(room)))
}

#[instrument(skip(app_state))]
async fn room_messages(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
    Path(room_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Response {
    history(&app_state, member, room_id, query).await
}
