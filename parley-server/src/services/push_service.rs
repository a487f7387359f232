//! Push delivery coordination.
//!
//! Fans a notification out to every endpoint a member registered, collects
//! the endpoints the provider rejected, and prunes exactly those.

use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use shared::models::{PushSubscription, SubscribeOutcome};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    errors::{MessagingError, MessagingResult},
    push_provider::PushProvider,
};
use crate::store::MemberDirectory;

#[derive(Clone)]
pub struct PushService {
    members: Arc<dyn MemberDirectory>,
    provider: Arc<dyn PushProvider>,
}

impl std::fmt::Debug for PushService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushService").finish_non_exhaustive()
    }
}

impl PushService {
    pub fn new(members: Arc<dyn MemberDirectory>, provider: Arc<dyn PushProvider>) -> Self {
        Self { members, provider }
    }

    /// Sends `text` to every subscription of `member` concurrently.
    ///
    /// Returns the subscriptions whose endpoint answered with a non-2xx
    /// status. Endpoints that could not be reached are logged and skipped;
    /// they are not reported dead.
    ///
    /// # Errors
    /// Fails only when the member's subscriptions cannot be loaded.
    #[instrument(skip(self, text), err)]
    pub async fn notify(&self, member: Uuid, text: &str) -> MessagingResult<Vec<PushSubscription>> {
        let subscriptions = self.members.subscriptions(member).await?;
        if subscriptions.is_empty() {
            debug!("member has no push subscriptions");
            return Ok(Vec::new());
        }

        let sends = subscriptions.iter().map(|subscription| async move {
            (subscription, self.provider.send(subscription, text).await)
        });

        let mut dead = Vec::new();
        for (subscription, result) in join_all(sends).await {
            match result {
                Ok(response) if response.is_success() => {
                    counter!("parley_push_sent_total").increment(1);
                }
                Ok(response) => {
                    counter!("parley_push_dead_total").increment(1);
                    warn!(
                        endpoint = %subscription.endpoint,
                        status = response.status,
                        error = %response.body,
                        "push endpoint rejected notification"
                    );
                    dead.push(subscription.clone());
                }
                Err(err) => {
                    counter!("parley_push_errors_total").increment(1);
                    warn!(endpoint = %subscription.endpoint, error = %err, "push delivery failed");
                }
            }
        }

        Ok(dead)
    }

    /// Removes subscriptions matching an entry of `dead` on all three fields.
    ///
    /// # Errors
    /// Returns a storage error if the removal fails.
    pub async fn prune_dead(
        &self,
        member: Uuid,
        dead: &[PushSubscription],
    ) -> MessagingResult<usize> {
        if dead.is_empty() {
            return Ok(0);
        }
        let removed = self.members.remove_subscriptions(member, dead).await?;
        info!(%member, removed, "pruned dead push subscriptions");
        Ok(removed)
    }

    /// Notify then prune; failures are logged, never returned.
    pub async fn deliver(&self, member: Uuid, text: &str) {
        let dead = match self.notify(member, text).await {
            Ok(dead) => dead,
            Err(err) => {
                warn!(%member, error = %err, "push notify failed");
                return;
            }
        };
        if let Err(err) = self.prune_dead(member, &dead).await {
            warn!(%member, error = %err, "push prune failed");
        }
    }

    /// # Errors
    /// `Validation` for blank fields, storage errors otherwise.
    pub async fn subscribe(
        &self,
        member: Uuid,
        subscription: PushSubscription,
    ) -> MessagingResult<SubscribeOutcome> {
        validate(&subscription)?;
        if self.members.add_subscription(member, &subscription).await? {
            Ok(SubscribeOutcome::Created)
        } else {
            Ok(SubscribeOutcome::AlreadyExists)
        }
    }

    /// Returns whether a subscription with this exact triple was removed.
    ///
    /// # Errors
    /// Storage errors from the member directory.
    pub async fn unsubscribe(
        &self,
        member: Uuid,
        subscription: &PushSubscription,
    ) -> MessagingResult<bool> {
        let removed = self
            .members
            .remove_subscriptions(member, std::slice::from_ref(subscription))
            .await?;
        Ok(removed > 0)
    }
}

fn validate(subscription: &PushSubscription) -> MessagingResult<()> {
    let blank = [
        ("endpoint", &subscription.endpoint),
        ("auth", &subscription.auth),
        ("p256dh", &subscription.p256dh),
    ]
    .into_iter()
    .find(|(_, value)| value.trim().is_empty());

    if let Some((field, _)) = blank {
        return Err(MessagingError::Validation(format!(
            "subscription {field} must not be empty"
        )));
    }
    if !subscription.endpoint.starts_with("http://") && !subscription.endpoint.starts_with("https://") {
        return Err(MessagingError::Validation(
            "subscription endpoint must be an http(s) URL".into(),
        ));
    }
    Ok(())
}
