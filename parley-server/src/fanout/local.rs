use std::collections::HashMap;

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use shared::models::Topic;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream, wrappers::errors::BroadcastStreamRecvError};
use tracing::{trace, warn};

use super::{FanoutBus, FanoutError, Subscription};

/// In-process bus with one broadcast channel per topic.
#[derive(Debug, Clone)]
pub struct LocalBus {
    channels: HashMap<Topic, broadcast::Sender<Value>>,
}

impl LocalBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let channels = Topic::ALL
            .into_iter()
            .map(|topic| (topic, broadcast::channel(capacity).0))
            .collect();
        Self { channels }
    }

    fn sender(&self, topic: Topic) -> Result<&broadcast::Sender<Value>, FanoutError> {
        self.channels
            .get(&topic)
            .ok_or_else(|| FanoutError::Transport(format!("no channel for {topic}")))
    }

    /// Number of live subscribers on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.channels
            .get(&topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    pub(crate) fn deliver(&self, topic: Topic, payload: Value) -> Result<usize, FanoutError> {
        // A send with no receivers is not a failure: nobody was listening.
        Ok(self.sender(topic)?.send(payload).unwrap_or(0))
    }
}

#[async_trait]
impl FanoutBus for LocalBus {
    async fn publish(&self, topic: Topic, payload: Value) -> Result<(), FanoutError> {
        let delivered = self.deliver(topic, payload)?;
        counter!("parley_fanout_published_total", "topic" => topic.as_str()).increment(1);
        trace!(%topic, delivered, "published fanout event");
        Ok(())
    }

    fn subscribe(&self, topic: Topic) -> Subscription {
        let Some(sender) = self.channels.get(&topic) else {
            return Box::pin(tokio_stream::empty());
        };

        let stream = BroadcastStream::new(sender.subscribe()).filter_map(move |item| match item {
            Ok(payload) => Some(payload),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(%topic, skipped, "fanout subscriber lagged; events dropped");
                counter!("parley_fanout_lagged_total", "topic" => topic.as_str())
                    .increment(skipped);
                None
            }
        });
        Box::pin(stream)
    }
}
