use serde::{Deserialize, Serialize};

/// A browser push endpoint registered by a member.
///
/// Two subscriptions are the same registration when endpoint, auth and
/// p256dh all match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PushSubscription {
    pub endpoint: String,
    pub auth: String,
    pub p256dh: String,
}

impl PushSubscription {
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        auth: impl Into<String>,
        p256dh: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth: auth.into(),
            p256dh: p256dh.into(),
        }
    }

    #[must_use]
    pub fn same_triple(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint && self.auth == other.auth && self.p256dh == other.p256dh
    }
}

/// Result of registering a subscription.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeOutcome {
    Created,
    AlreadyExists,
}
