use std::str::FromStr;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use uuid::Uuid;

use crate::http::error::{ApiError, AppResult};
use shared::config::server::Config;

/// Per-request identity: correlation id and the member the upstream proxy
/// authenticated, if any.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub member_id: Option<Uuid>,
}

#[derive(Clone, Debug)]
pub struct RequestContextState {
    request_header: HeaderName,
    member_header: HeaderName,
}

impl RequestContextState {
    pub fn from_config(config: &Config) -> Self {
        let request_header = HeaderName::from_str(&config.server.request_id_header)
            .unwrap_or_else(|_| HeaderName::from_static("x-request-id"));
        let member_header = HeaderName::from_str(&config.server.member_header)
            .unwrap_or_else(|_| HeaderName::from_static("x-member-id"));
        Self {
            request_header,
            member_header,
        }
    }
}

pub async fn assign_request_context(
    State(state): State<RequestContextState>,
    mut request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let request_id = header_value(request.headers(), &state.request_header)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let member_id = header_value(request.headers(), &state.member_header).and_then(|raw| {
        Uuid::parse_str(&raw)
            .inspect_err(|err| debug!(error = %err, "ignoring malformed member header"))
            .ok()
    });

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
        member_id,
    });

    let encoded = HeaderValue::from_str(&request_id)
        .map_err(|_| ApiError::internal_server_error("failed to encode request id"))?;
    request
        .headers_mut()
        .insert(state.request_header.clone(), encoded.clone());

    let mut response = next.run(request).await;
    response.headers_mut().insert(state.request_header, encoded);

    Ok(response)
}

fn header_value(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
