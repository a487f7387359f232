use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use shared::{
    config::server::PaginationConfig,
    models::{
        MessagePage, PageQuery, PageResponse, SendDirectMessageRequest, ThreadKind, ThreadView,
    },
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    http::error::{AppResult, status_for},
    middleware::auth::CurrentMember,
    services::{MessagingError, message_store::compose_message},
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/messages", post(send_direct_message))
        .route("/api/conversations/{thread_id}", get(get_conversation))
        .route(
            "/api/conversations/{thread_id}/messages",
            get(conversation_messages),
        )
}

#[instrument(skip(app_state))]
async fn list_conversations(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
) -> AppResult<Json<Vec<ThreadView>>> {
    let threads = app_state
        .messages
        .list_threads_for_member(member, ThreadKind::Conversation)
        .await?;
    Ok(Json(threads))
}

#[instrument(skip(app_state, payload), fields(recipient = %payload.recipient))]
async fn send_direct_message(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
    Json(payload): Json<SendDirectMessageRequest>,
) -> AppResult<(StatusCode, Json<ThreadView>)> {
    let SendDirectMessageRequest {
        recipient,
        body,
        media,
    } = payload;
    let message = compose_message(member, body, media)?;
    let resolution = app_state
        .resolver
        .get_or_create(member, recipient, message)
        .await?;
    app_state.events.dispatch(resolution.events).await;
    Ok((StatusCode::CREATED, Json(resolution.thread)))
}

#[instrument(skip(app_state))]
async fn get_conversation(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
    Path(thread_id): Path<Uuid>,
) -> AppResult<Json<ThreadView>> {
    let thread = app_state.messages.ensure_member(thread_id, member).await?;
    if thread.kind != ThreadKind::Conversation {
        return Err(MessagingError::NotFound(format!("conversation {thread_id} not found")).into());
    }
    Ok(Json(app_state.messages.get_thread(thread_id).await?))
}

#[instrument(skip(app_state))]
async fn conversation_messages(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
    Path(thread_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Response {
    history(&app_state, member, thread_id, query).await
}

/// Page of a thread's history for one of its members.
///
/// Failures keep the page shape: counters are zeroed, `error` carries the
/// reason and the status code matches the failure.
pub(crate) async fn history(
    app_state: &AppState,
    member: Uuid,
    thread_id: Uuid,
    query: PageQuery,
) -> Response {
    if let Err(err) = app_state.messages.ensure_member(thread_id, member).await {
        return failed_page(&err);
    }

    let (skip, limit) = window(&app_state.config.pagination, query);
    let outcome = app_state.pagination.page(thread_id, skip, limit).await;
    match outcome.fault {
        Some(err) => failed_page(&err),
        None => Json(PageResponse {
            page: outcome.page,
            error: None,
        })
        .into_response(),
    }
}

fn window(config: &PaginationConfig, query: PageQuery) -> (u64, u64) {
    let skip = query.skip.unwrap_or(0);
    let limit = query
        .limit
        .unwrap_or(config.default_limit)
        .min(config.max_limit);
    (skip, limit)
}

fn failed_page(err: &MessagingError) -> Response {
    let body = PageResponse {
        page: MessagePage::empty(),
        error: Some(err.message().to_string()),
    };
    (status_for(err), Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> PaginationConfig {
        PaginationConfig {
            default_limit: 20,
            max_limit: 100,
        }
    }

    #[test]
    fn window_applies_defaults() {
        assert_eq!(window(&limits(), PageQuery::default()), (0, 20));
    }

    #[test]
    fn window_clamps_large_limits() {
        let query = PageQuery {
            skip: Some(40),
            limit: Some(10_000),
        };
        assert_eq!(window(&limits(), query), (40, 100));
    }

    #[test]
    fn zero_limit_is_passed_through() {
        let query = PageQuery {
            skip: None,
            limit: Some(0),
        };
        assert_eq!(window(&limits(), query), (0, 0));
    }

    #[test]
    fn failed_page_uses_error_status() {
        let response = failed_page(&MessagingError::Forbidden("nope".into()));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
