use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use tracing::{Span, instrument};
use uuid::Uuid;

use crate::{http::error::ApiError, middleware::request_context::RequestContext};

/// Rejects requests without an authenticated member.
#[instrument(skip_all, fields(member_id))]
pub async fn require_member(req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let member = req
        .extensions()
        .get::<RequestContext>()
        .and_then(|context| context.member_id)
        .ok_or_else(|| ApiError::unauthorized("missing or invalid member identity"))?;
    Span::current().record("member_id", tracing::field::display(member));
    Ok(next.run(req).await)
}

/// The authenticated member of the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentMember(pub Uuid);

impl<S> FromRequestParts<S> for CurrentMember
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .and_then(|context| context.member_id)
            .map(CurrentMember)
            .ok_or_else(|| ApiError::unauthorized("missing or invalid member identity"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, middleware::from_fn, routing::get};
    use tower::ServiceExt;

    fn app(context: Option<RequestContext>) -> Router {
        let router = Router::new()
            .route(
                "/",
                get(|CurrentMember(member): CurrentMember| async move { member.to_string() }),
            )
            .layer(from_fn(require_member));
        match context {
            Some(context) => router.layer(axum::Extension(context)),
            None => router,
        }
    }

    #[tokio::test]
    async fn anonymous_requests_are_unauthorized() {
        let response = app(Some(RequestContext::default()))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(None)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn members_pass_through() {
        let member = Uuid::new_v4();
        let response = app(Some(RequestContext {
            request_id: "r".into(),
            member_id: Some(member),
        }))
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
