use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use shared::{config::server::PushConfig, models::PushSubscription};
use thiserror::Error;

/// Status and body returned by a push endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResponse {
    pub status: u16,
    pub body: String,
}

impl PushResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("failed to build push client: {0}")]
    Client(String),
    /// The endpoint could not be reached at all.
    #[error("push transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &str,
    ) -> Result<PushResponse, PushError>;
}

#[derive(Serialize)]
struct Envelope<'a> {
    auth: &'a str,
    p256dh: &'a str,
    payload: &'a str,
}

/// Posts a JSON envelope to the subscription endpoint; the gateway behind
/// the endpoint handles payload encryption.
#[derive(Debug, Clone)]
pub struct HttpPushProvider {
    client: reqwest::Client,
    ttl_seconds: u32,
}

impl HttpPushProvider {
    /// # Errors
    /// Returns [`PushError::Client`] if the HTTP client cannot be built.
    pub fn new(config: &PushConfig) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| PushError::Client(err.to_string()))?;
        Ok(Self {
            client,
            ttl_seconds: config.ttl_seconds,
        })
    }
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &str,
    ) -> Result<PushResponse, PushError> {
        let response = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", self.ttl_seconds)
            .json(&Envelope {
                auth: &subscription.auth,
                p256dh: &subscription.p256dh,
                payload,
            })
            .send()
            .await
            .map_err(|err| PushError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(PushResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, http::StatusCode, routing::post};
    use serde_json::Value;
    use tokio::net::TcpListener;

    async fn gateway() -> String {
        async fn accept(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, String) {
            let ttl = headers
                .get("ttl")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            (StatusCode::CREATED, format!("{ttl}:{}", body["payload"]))
        }

        let app = Router::new()
            .route("/live", post(accept))
            .route("/gone", post(|| async { (StatusCode::GONE, "subscription expired") }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn provider() -> HttpPushProvider {
        HttpPushProvider::new(&PushConfig {
            timeout_ms: 2_000,
            ttl_seconds: 60,
            ..PushConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn successful_delivery_reports_status_and_body() {
        let base = gateway().await;
        let subscription = PushSubscription::new(format!("{base}/live"), "auth", "key");

        let response = provider().send(&subscription, "hello").await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.status, 201);
        assert_eq!(response.body, "60:\"hello\"");
    }

    #[tokio::test]
    async fn rejected_delivery_keeps_the_body_as_error_text() {
        let base = gateway().await;
        let subscription = PushSubscription::new(format!("{base}/gone"), "auth", "key");

        let response = provider().send(&subscription, "hello").await.unwrap();
        assert!(!response.is_success());
        assert_eq!(response.status, 410);
        assert_eq!(response.body, "subscription expired");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let subscription = PushSubscription::new("http://127.0.0.1:9/push", "auth", "key");
        let err = provider().send(&subscription, "hello").await.unwrap_err();
        assert!(matches!(err, PushError::Transport(_)));
    }
}
