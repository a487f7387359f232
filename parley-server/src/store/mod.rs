//! Persistence seams for threads and members.
//!
//! Services only see the [`ThreadStore`] and [`MemberDirectory`] traits;
//! [`memory`] backs tests and development, [`postgres`] backs deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::join_all;
use shared::models::{
    MemberProfile, Message, NewThread, PushSubscription, Thread, ThreadKind,
};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryMemberDirectory, MemoryThreadStore};
pub use postgres::{PgMemberDirectory, PgThreadStore};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn thread_not_found(id: Uuid) -> StoreError {
    StoreError::NotFound(format!("thread {id} not found"))
}

pub(crate) fn last_member_conflict(id: Uuid, member: Uuid) -> StoreError {
    StoreError::Conflict(format!("member {member} is the last member of thread {id}"))
}

/// Document-shaped storage of threads and their message logs.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Inserts a thread, optionally seeded with its first message.
    ///
    /// Conversations are unique per member pair; a second insert for the
    /// same pair fails with [`StoreError::Conflict`].
    async fn insert(&self, thread: NewThread, initial: Option<Message>) -> StoreResult<Thread>;

    /// Fetches a thread; `messages` is left empty unless `include_messages`.
    async fn get(&self, id: Uuid, include_messages: bool) -> StoreResult<Thread>;

    /// Pushes `message` onto the log and sets `last_message` to it.
    ///
    /// Both effects must become visible together: no reader or concurrent
    /// appender may observe one without the other. The returned thread has
    /// an empty `messages` vector.
    async fn append_and_set_last(&self, id: Uuid, message: &Message) -> StoreResult<Thread>;

    /// Conversation whose members include both `a` and `b`.
    async fn find_conversation(&self, a: Uuid, b: Uuid) -> StoreResult<Option<Thread>>;

    /// Threads of `kind` containing `member`, without message logs.
    async fn list_for_member(&self, member: Uuid, kind: ThreadKind) -> StoreResult<Vec<Thread>>;

    async fn message_count(&self, id: Uuid) -> StoreResult<u64>;

    /// Window over the log in reverse chronological order.
    async fn messages_newest_first(
        &self,
        id: Uuid,
        skip: u64,
        limit: u64,
    ) -> StoreResult<Vec<Message>>;

    /// Adds a member to a room; adding an existing member is a no-op.
    async fn add_member(&self, id: Uuid, member: Uuid) -> StoreResult<Thread>;

    /// Removes a member from a room; `NotFound` if they were not in it,
    /// `Conflict` if they are its only member.
    async fn remove_member(&self, id: Uuid, member: Uuid) -> StoreResult<Thread>;

    /// Deletes a thread and returns its last stored state.
    async fn delete(&self, id: Uuid) -> StoreResult<Thread>;
}

/// The members collaborator: display fields, room back-references and
/// push subscriptions.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn resolve_member(&self, id: Uuid) -> StoreResult<Option<MemberProfile>>;

    /// Resolves every id concurrently; ids that fail or are unknown are
    /// absent from the result.
    async fn resolve_many(&self, ids: &[Uuid]) -> HashMap<Uuid, MemberProfile> {
        let lookups = ids.iter().map(|id| async move { (*id, self.resolve_member(*id).await) });
        let mut resolved = HashMap::with_capacity(ids.len());
        for (id, result) in join_all(lookups).await {
            match result {
                Ok(Some(profile)) => {
                    resolved.insert(id, profile);
                }
                Ok(None) => {}
                Err(err) => warn!(member_id = %id, error = %err, "member lookup failed"),
            }
        }
        resolved
    }

    async fn upsert_member(&self, profile: MemberProfile) -> StoreResult<MemberProfile>;

    async fn record_room_created(&self, member: Uuid, room: Uuid) -> StoreResult<()>;

    async fn record_room_left(&self, member: Uuid, room: Uuid) -> StoreResult<()>;

    async fn rooms_of(&self, member: Uuid) -> StoreResult<Vec<Uuid>>;

    async fn subscriptions(&self, member: Uuid) -> StoreResult<Vec<PushSubscription>>;

    /// Returns `false` when the exact triple was already registered.
    async fn add_subscription(
        &self,
        member: Uuid,
        subscription: &PushSubscription,
    ) -> StoreResult<bool>;

    /// Removes entries matching a listed triple exactly; returns how many.
    async fn remove_subscriptions(
        &self,
        member: Uuid,
        subscriptions: &[PushSubscription],
    ) -> StoreResult<usize>;
}
