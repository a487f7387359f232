//! Message store service.
//!
//! Wraps a [`ThreadStore`] with validation, member hydration and the
//! domain events each write produces. Storage faults surface as
//! [`MessagingError::Storage`] carrying the backend's message verbatim.

use std::{cmp::Reverse, sync::Arc};

use metrics::counter;
use shared::models::{AuthorRef, Media, Message, MessageView, NewThread, Thread, ThreadKind, ThreadView};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    errors::{MessagingError, MessagingResult},
    events::DomainEvent,
    hydrate::Hydrator,
};
use crate::store::{MemberDirectory, StoreError, ThreadStore};

/// Builds a message for `author`, rejecting messages with neither text nor
/// attachments.
///
/// # Errors
/// Returns [`MessagingError::Validation`] for empty messages or media
/// without a type or path.
pub fn compose_message(
    author: Uuid,
    body: Option<String>,
    media: Vec<Media>,
) -> MessagingResult<Message> {
    let body = body.filter(|text| !text.trim().is_empty());
    if body.is_none() && media.is_empty() {
        return Err(MessagingError::Validation(
            "message needs a body or at least one attachment".into(),
        ));
    }
    if media
        .iter()
        .any(|item| item.kind.trim().is_empty() || item.path.trim().is_empty())
    {
        return Err(MessagingError::Validation(
            "attachments need a type and a path".into(),
        ));
    }
    Ok(Message::new(author, body, media))
}

/// Service for persisting and reading threads.
///
/// All reads return hydrated views: member ids and message authors are
/// resolved through the member directory where possible.
#[derive(Clone)]
pub struct MessageStore {
    threads: Arc<dyn ThreadStore>,
    hydrator: Hydrator,
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore").finish_non_exhaustive()
    }
}

impl MessageStore {
    /// Creates a message store over the given collaborators.
    ///
    /// # Arguments
    /// * `threads` - Document storage for threads and their message logs
    /// * `members` - Directory used to hydrate member ids
    pub fn new(threads: Arc<dyn ThreadStore>, members: Arc<dyn MemberDirectory>) -> Self {
        Self {
            threads,
            hydrator: Hydrator::new(members),
        }
    }

    pub fn hydrator(&self) -> &Hydrator {
        &self.hydrator
    }

    /// Appends `message` to a thread and moves `last_message` to it.
    ///
    /// # Arguments
    /// * `thread_id` - The thread to append to
    /// * `message` - The message; its id and date are already set
    ///
    /// # Returns
    /// The thread without its message log, hydrated for its members and
    /// the new last message, plus a `MessageAppended` event.
    ///
    /// # Errors
    /// `NotFound` if the thread does not exist; `Storage` on backend faults.
    #[instrument(skip(self, message), fields(message_id = %message.id), err)]
    pub async fn append(
        &self,
        thread_id: Uuid,
        message: Message,
    ) -> MessagingResult<(ThreadView, DomainEvent)> {
        let thread = self.threads.append_and_set_last(thread_id, &message).await?;
        counter!("parley_messages_appended_total", "kind" => thread.kind.as_str()).increment(1);

        let view = self.hydrator.thread(thread, false).await;
        let appended = view.last_message.clone().unwrap_or_else(|| {
            let author = AuthorRef::Unresolved(message.author);
            MessageView::new(message, author)
        });
        let event = DomainEvent::MessageAppended {
            thread_id,
            kind: view.kind,
            members: view.member_ids(),
            message: appended,
        };
        Ok((view, event))
    }

    /// Creates a thread, optionally seeded with its first message.
    ///
    /// # Arguments
    /// * `new_thread` - Kind, membership and room metadata
    /// * `initial` - First message; becomes the sole log entry and `last_message`
    ///
    /// # Returns
    /// The created thread with members populated and a `ThreadCreated` event.
    ///
    /// # Errors
    /// `Validation` for malformed membership; `Storage` on backend faults,
    /// including a lost conversation-creation race.
    #[instrument(skip(self, new_thread, initial), fields(kind = new_thread.kind.as_str()), err)]
    pub async fn create(
        &self,
        new_thread: NewThread,
        initial: Option<Message>,
    ) -> MessagingResult<(ThreadView, DomainEvent)> {
        validate_membership(&new_thread)?;
        let thread = self.threads.insert(new_thread, initial).await?;
        Ok(self.created(thread).await)
    }

    /// Creates the conversation between `a` and `b` seeded with `message`.
    ///
    /// Returns `Ok(None)` when another writer created the pair's
    /// conversation first.
    pub(crate) async fn create_conversation(
        &self,
        a: Uuid,
        b: Uuid,
        message: Message,
    ) -> MessagingResult<Option<(ThreadView, DomainEvent)>> {
        let new_thread = NewThread::conversation(a, b);
        validate_membership(&new_thread)?;
        match self.threads.insert(new_thread, Some(message)).await {
            Ok(thread) => Ok(Some(self.created(thread).await)),
            Err(StoreError::Conflict(reason)) => {
                debug!(%reason, "conversation already created by a concurrent writer");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn created(&self, thread: Thread) -> (ThreadView, DomainEvent) {
        counter!("parley_threads_created_total", "kind" => thread.kind.as_str()).increment(1);
        let view = self.hydrator.thread(thread, false).await;
        let event = DomainEvent::ThreadCreated {
            thread: view.clone(),
        };
        (view, event)
    }

    /// Threads of `kind` containing `member`, newest activity first.
    ///
    /// Message logs are excluded. Threads without messages sort last.
    ///
    /// # Errors
    /// `Storage` on backend faults.
    pub async fn list_threads_for_member(
        &self,
        member: Uuid,
        kind: ThreadKind,
    ) -> MessagingResult<Vec<ThreadView>> {
        let mut threads = self.threads.list_for_member(member, kind).await?;
        threads.sort_by_key(|thread| {
            Reverse((
                thread.last_message.as_ref().map(|last| last.date),
                thread.created_at,
            ))
        });
        Ok(self.hydrator.threads(threads).await)
    }

    /// Single thread with its full message log.
    ///
    /// # Errors
    /// `NotFound` if the thread does not exist.
    pub async fn get_thread(&self, thread_id: Uuid) -> MessagingResult<ThreadView> {
        let thread = self.threads.get(thread_id, true).await?;
        Ok(self.hydrator.thread(thread, true).await)
    }

    /// Loads a thread without its log and checks `member` belongs to it.
    ///
    /// # Errors
    /// `NotFound` if the thread is missing, `Forbidden` if `member` is not
    /// one of its members.
    pub async fn ensure_member(&self, thread_id: Uuid, member: Uuid) -> MessagingResult<Thread> {
        let thread = self.threads.get(thread_id, false).await?;
        if thread.has_member(member) {
            Ok(thread)
        } else {
            Err(MessagingError::Forbidden(format!(
                "member {member} is not part of thread {thread_id}"
            )))
        }
    }
}

fn validate_membership(thread: &NewThread) -> MessagingResult<()> {
    match thread.kind {
        ThreadKind::Conversation => match thread.members.as_slice() {
            [a, b] if a != b => Ok(()),
            _ => Err(MessagingError::Validation(
                "a conversation needs exactly two distinct members".into(),
            )),
        },
        ThreadKind::Room if thread.members.is_empty() => Err(MessagingError::Validation(
            "a room needs at least one member".into(),
        )),
        ThreadKind::Room => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryMemberDirectory, MemoryThreadStore};
    use shared::models::MemberProfile;

    struct Fixture {
        store: MessageStore,
        members: Arc<MemoryMemberDirectory>,
    }

    fn fixture() -> Fixture {
        let members = Arc::new(MemoryMemberDirectory::new());
        let store = MessageStore::new(Arc::new(MemoryThreadStore::new()), members.clone());
        Fixture { store, members }
    }

    fn text(author: Uuid, body: &str) -> Message {
        compose_message(author, Some(body.into()), vec![]).unwrap()
    }

    #[tokio::test]
    async fn append_moves_last_message_and_extends_log() {
        let Fixture { store, .. } = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (thread, _) = store
            .create(NewThread::conversation(a, b), Some(text(a, "one")))
            .await
            .unwrap();

        let second = text(b, "two");
        let (view, event) = store.append(thread.id, second.clone()).await.unwrap();
        assert_eq!(view.last_message.as_ref().map(|m| m.id), Some(second.id));

        let full = store.get_thread(thread.id).await.unwrap();
        let messages = full.messages.unwrap();
        assert_eq!(messages.last().map(|m| m.id), Some(second.id));
        assert_eq!(full.last_message.map(|m| m.id), Some(second.id));

        match event {
            DomainEvent::MessageAppended {
                thread_id, members, ..
            } => {
                assert_eq!(thread_id, thread.id);
                assert_eq!(members, vec![a, b]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn append_to_unknown_thread_is_not_found() {
        let Fixture { store, .. } = fixture();
        let err = store
            .append(Uuid::new_v4(), text(Uuid::new_v4(), "lost"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn created_threads_are_hydrated() {
        let Fixture { store, members } = fixture();
        let ada = members
            .upsert_member(MemberProfile {
                id: Uuid::new_v4(),
                username: "ada".into(),
                email: None,
                picture: None,
            })
            .await
            .unwrap();
        let other = Uuid::new_v4();

        let (view, event) = store
            .create(NewThread::conversation(ada.id, other), Some(text(ada.id, "hi")))
            .await
            .unwrap();
        assert_eq!(view.member_profile(ada.id), Some(&ada));
        assert_eq!(
            view.last_message.unwrap().author,
            AuthorRef::Member(ada.clone())
        );
        assert!(matches!(event, DomainEvent::ThreadCreated { .. }));
    }

    #[tokio::test]
    async fn listing_sorts_by_latest_activity() {
        let Fixture { store, .. } = fixture();
        let me = Uuid::new_v4();
        let (quiet, _) = store
            .create(NewThread::room(me, Some("quiet".into()), vec![]), None)
            .await
            .unwrap();
        let (older, _) = store
            .create(NewThread::room(me, Some("older".into()), vec![]), None)
            .await
            .unwrap();
        let (newer, _) = store
            .create(NewThread::room(me, Some("newer".into()), vec![]), None)
            .await
            .unwrap();
        store.append(older.id, text(me, "first")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.append(newer.id, text(me, "second")).await.unwrap();

        let listed = store
            .list_threads_for_member(me, ThreadKind::Room)
            .await
            .unwrap();
        let ids: Vec<_> = listed.iter().map(|thread| thread.id).collect();
        assert_eq!(ids, vec![newer.id, older.id, quiet.id]);
        assert!(listed.iter().all(|thread| thread.messages.is_none()));
    }

    #[tokio::test]
    async fn conversations_need_two_distinct_members() {
        let Fixture { store, .. } = fixture();
        let me = Uuid::new_v4();
        let err = store
            .create(NewThread::conversation(me, me), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_failed");
    }

    #[tokio::test]
    async fn ensure_member_rejects_outsiders() {
        let Fixture { store, .. } = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (thread, _) = store
            .create(NewThread::conversation(a, b), None)
            .await
            .unwrap();

        assert!(store.ensure_member(thread.id, a).await.is_ok());
        let err = store
            .ensure_member(thread.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }

    #[test]
    fn empty_messages_are_rejected() {
        let author = Uuid::new_v4();
        assert!(compose_message(author, None, vec![]).is_err());
        assert!(compose_message(author, Some("   ".into()), vec![]).is_err());
        let media = vec![Media {
            kind: "image".into(),
            path: "a/b.png".into(),
        }];
        let message = compose_message(author, Some(String::new()), media).unwrap();
        assert!(message.body.is_none());
    }
}
