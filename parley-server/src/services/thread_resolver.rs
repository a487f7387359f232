use std::sync::Arc;

use shared::models::{Message, ThreadView};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    errors::{MessagingError, MessagingResult},
    events::{DomainEvent, direct_message_notification},
    message_store::MessageStore,
};
use crate::store::ThreadStore;

/// Outcome of delivering a direct message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub thread: ThreadView,
    /// `true` when this message opened the conversation.
    pub created: bool,
    pub events: Vec<DomainEvent>,
}

/// Find-or-create of the conversation between two members.
///
/// Conversations are unique per member pair in storage, so two first
/// messages racing each other end up in the same conversation: the loser's
/// insert conflicts and its message is appended to the winner's thread.
#[derive(Clone)]
pub struct ThreadResolver {
    threads: Arc<dyn ThreadStore>,
    messages: MessageStore,
}

impl std::fmt::Debug for ThreadResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadResolver").finish_non_exhaustive()
    }
}

impl ThreadResolver {
    pub fn new(threads: Arc<dyn ThreadStore>, messages: MessageStore) -> Self {
        Self { threads, messages }
    }

    /// Delivers `message` from `sender` to `recipient`.
    ///
    /// # Errors
    /// `Validation` when sending to oneself; storage errors otherwise.
    #[instrument(skip(self, message), err)]
    pub async fn get_or_create(
        &self,
        sender: Uuid,
        recipient: Uuid,
        message: Message,
    ) -> MessagingResult<Resolution> {
        if sender == recipient {
            return Err(MessagingError::Validation(
                "cannot start a conversation with yourself".into(),
            ));
        }

        let preview = message.preview().to_string();

        if let Some(existing) = self.threads.find_conversation(sender, recipient).await? {
            return self
                .append(existing.id, sender, recipient, message, &preview)
                .await;
        }

        match self
            .messages
            .create_conversation(sender, recipient, message.clone())
            .await?
        {
            Some((thread, created)) => {
                info!(thread_id = %thread.id, "conversation created");
                let notify = notification(&thread, sender, recipient, &preview);
                Ok(Resolution {
                    thread,
                    created: true,
                    events: vec![created, notify],
                })
            }
            None => {
                let existing = self
                    .threads
                    .find_conversation(sender, recipient)
                    .await?
                    .ok_or_else(|| {
                        MessagingError::Storage(
                            "conversation conflict reported but no conversation found".into(),
                        )
                    })?;
                self.append(existing.id, sender, recipient, message, &preview)
                    .await
            }
        }
    }

    async fn append(
        &self,
        thread_id: Uuid,
        sender: Uuid,
        recipient: Uuid,
        message: Message,
        preview: &str,
    ) -> MessagingResult<Resolution> {
        let (thread, appended) = self.messages.append(thread_id, message).await?;
        let notify = notification(&thread, sender, recipient, preview);
        Ok(Resolution {
            thread,
            created: false,
            events: vec![appended, notify],
        })
    }
}

fn notification(thread: &ThreadView, sender: Uuid, recipient: Uuid, preview: &str) -> DomainEvent {
    let sender_name = thread
        .member_profile(sender)
        .map_or_else(|| sender.to_string(), |profile| profile.username.clone());
    DomainEvent::DirectMessageAdded {
        recipient,
        sender,
        thread_id: thread.id,
        notification: direct_message_notification(&sender_name, preview),
    }
}
