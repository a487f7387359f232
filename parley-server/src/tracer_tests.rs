//! Tests for the HTTP tracing layer.

#[cfg(test)]
mod tests {
    use super::super::tracer::*;
    use crate::middleware::request_context::RequestContext;
    use axum::body::Body;
    use axum::http::{Method, Request, Response, StatusCode};
    use std::time::Duration;
    use tower_http::{classify::ServerErrorsFailureClass, trace::MakeSpan};
    use tracing::{Level, span};
    use tracing_subscriber::util::SubscriberInitExt;
    use uuid::Uuid;

    #[test]
    fn make_span_uses_request_context() {
        let _guard = tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .set_default();

        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/api/rooms")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(RequestContext {
            request_id: "req-7".into(),
            member_id: Some(Uuid::new_v4()),
        });

        let span = HttpMakeSpan.make_span(&request);
        assert_eq!(span.metadata().map(|meta| meta.name()), Some("http_request"));
    }

    #[test]
    fn make_span_without_context_does_not_panic() {
        let _guard = tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .set_default();
        let request = Request::builder().uri("/healthz").body(()).unwrap();
        let _span = HttpMakeSpan.make_span(&request);
    }

    #[test]
    fn handlers_log_inside_span() {
        let _guard = tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .set_default();
        let span = span!(Level::INFO, "test_span", status_code = tracing::field::Empty);

        let request = Request::builder().uri("/x").body(Body::empty()).unwrap();
        on_request_handler(&request, &span);

        let response = Response::builder()
            .status(StatusCode::CREATED)
            .body(Body::empty())
            .unwrap();
        on_response_handler(&response, Duration::from_millis(3), &span);

        on_failure_handler(
            ServerErrorsFailureClass::StatusCode(StatusCode::BAD_GATEWAY),
            Duration::from_millis(12),
            &span,
        );
    }

    #[test]
    fn trace_layer_builds() {
        let layer = create_trace_layer();
        assert!(std::mem::size_of_val(&layer) > 0);
    }
}
