//! Room lifecycle and room messaging.

use std::sync::Arc;

use shared::models::{Media, NewThread, Thread, ThreadKind, ThreadView};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    errors::{MessagingError, MessagingResult},
    events::DomainEvent,
    message_store::{MessageStore, compose_message},
};
use crate::store::{MemberDirectory, StoreError, ThreadStore};

const MAX_ROOM_NAME: usize = 120;

#[derive(Clone)]
pub struct RoomService {
    threads: Arc<dyn ThreadStore>,
    members: Arc<dyn MemberDirectory>,
    messages: MessageStore,
}

impl std::fmt::Debug for RoomService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomService").finish_non_exhaustive()
    }
}

impl RoomService {
    pub fn new(
        threads: Arc<dyn ThreadStore>,
        members: Arc<dyn MemberDirectory>,
        messages: MessageStore,
    ) -> Self {
        Self {
            threads,
            members,
            messages,
        }
    }

    #[instrument(skip(self, name, members), err)]
    pub async fn create_room(
        &self,
        owner: Uuid,
        name: Option<String>,
        members: Vec<Uuid>,
    ) -> MessagingResult<(ThreadView, Vec<DomainEvent>)> {
        let name = name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        if name
            .as_ref()
            .is_some_and(|name| name.chars().count() > MAX_ROOM_NAME)
        {
            return Err(MessagingError::Validation(format!(
                "room name is longer than {MAX_ROOM_NAME} characters"
            )));
        }

        let (room, created) = self
            .messages
            .create(NewThread::room(owner, name, members), None)
            .await?;
        for member in room.member_ids() {
            self.record_joined(member, room.id).await;
        }
        info!(room_id = %room.id, members = room.members.len(), "room created");
        Ok((room, vec![created]))
    }

    /// Adds `member` to the room; joining twice is a no-op.
    #[instrument(skip(self), err)]
    pub async fn join_room(
        &self,
        room_id: Uuid,
        member: Uuid,
    ) -> MessagingResult<(ThreadView, Vec<DomainEvent>)> {
        self.room(room_id).await?;
        let room = self.threads.add_member(room_id, member).await?;
        self.record_joined(member, room_id).await;
        Ok(self.membership_changed(room, member, true).await)
    }

    /// # Errors
    /// `NotFound` if the room is missing or `member` is not in it;
    /// `Validation` if `member` is the last one left, since a room keeps at
    /// least one member until its owner deletes it.
    #[instrument(skip(self), err)]
    pub async fn leave_room(
        &self,
        room_id: Uuid,
        member: Uuid,
    ) -> MessagingResult<(ThreadView, Vec<DomainEvent>)> {
        self.room(room_id).await?;
        let room = match self.threads.remove_member(room_id, member).await {
            Ok(room) => room,
            Err(StoreError::Conflict(_)) => {
                return Err(MessagingError::Validation(
                    "the last member cannot leave a room; delete it instead".into(),
                ));
            }
            Err(err) => return Err(err.into()),
        };
        if let Err(err) = self.members.record_room_left(member, room_id).await {
            warn!(%member, %room_id, error = %err, "failed to clear room back-reference");
        }
        Ok(self.membership_changed(room, member, false).await)
    }

    /// Deletes a room; only its owner may.
    #[instrument(skip(self), err)]
    pub async fn delete_room(&self, room_id: Uuid, actor: Uuid) -> MessagingResult<Vec<DomainEvent>> {
        let room = self.room(room_id).await?;
        if room.owner != Some(actor) {
            return Err(MessagingError::Forbidden(
                "only the room owner can delete it".into(),
            ));
        }

        let deleted = self.threads.delete(room_id).await?;
        for member in &deleted.members {
            if let Err(err) = self.members.record_room_left(*member, room_id).await {
                warn!(%member, error = %err, "failed to clear room back-reference");
            }
        }
        info!(%room_id, "room deleted");
        Ok(vec![DomainEvent::RoomDeleted {
            room_id,
            members: deleted.members,
        }])
    }

    pub async fn list_rooms(&self, member: Uuid) -> MessagingResult<Vec<ThreadView>> {
        self.messages
            .list_threads_for_member(member, ThreadKind::Room)
            .await
    }

    /// Posts a message to a room the author belongs to.
    #[instrument(skip(self, body, media), err)]
    pub async fn post(
        &self,
        room_id: Uuid,
        author: Uuid,
        body: Option<String>,
        media: Vec<Media>,
    ) -> MessagingResult<(ThreadView, Vec<DomainEvent>)> {
        let room = self.room(room_id).await?;
        if !room.has_member(author) {
            return Err(MessagingError::Forbidden(format!(
                "member {author} is not in room {room_id}"
            )));
        }
        let message = compose_message(author, body, media)?;
        let (thread, appended) = self.messages.append(room_id, message).await?;
        Ok((thread, vec![appended]))
    }

    /// Room summary without its log; `NotFound` for conversations too.
    pub async fn room(&self, room_id: Uuid) -> MessagingResult<Thread> {
        match self.threads.get(room_id, false).await {
            Ok(thread) if thread.kind == ThreadKind::Room => Ok(thread),
            Ok(_) | Err(StoreError::NotFound(_)) => {
                Err(MessagingError::NotFound(format!("room {room_id} not found")))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn record_joined(&self, member: Uuid, room_id: Uuid) {
        if let Err(err) = self.members.record_room_created(member, room_id).await {
            warn!(%member, %room_id, error = %err, "failed to record room back-reference");
        }
    }

    async fn membership_changed(
        &self,
        room: Thread,
        member: Uuid,
        joined: bool,
    ) -> (ThreadView, Vec<DomainEvent>) {
        let view = self.messages.hydrator().thread(room, false).await;
        let event = DomainEvent::RoomMembershipChanged {
            room_id: view.id,
            member,
            joined,
            members: view.member_ids(),
        };
        (view, vec![event])
    }
}
