//! Topic-keyed publish/subscribe for live delivery.
//!
//! Delivery is best-effort and at-most-once: a payload reaches the
//! subscribers attached when it is published, with no replay for late
//! subscribers. Dropping a [`Subscription`] detaches only that consumer.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use shared::models::Topic;
use thiserror::Error;

pub mod local;
pub mod postgres;

pub use local::LocalBus;
pub use postgres::{PgBus, reconnect_delay};

/// Stream of payloads for one topic; drop it to unsubscribe.
pub type Subscription = BoxStream<'static, Value>;

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("fanout transport error: {0}")]
    Transport(String),
}

impl From<sqlx::Error> for FanoutError {
    fn from(err: sqlx::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[async_trait]
pub trait FanoutBus: Send + Sync {
    async fn publish(&self, topic: Topic, payload: Value) -> Result<(), FanoutError>;

    /// Attaches a new subscriber. The subscriber is registered before this
    /// returns, so every later publish reaches it.
    fn subscribe(&self, topic: Topic) -> Subscription;
}
