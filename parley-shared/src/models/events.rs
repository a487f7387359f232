use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::thread::{MessageView, ThreadKind, ThreadView};

/// Logical channels of the fanout bus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    ConversationCreated,
    RoomCreated,
    /// Shared by every thread; payloads carry the thread id.
    MessageCreated,
    RoomDeleted,
    RoomMembership,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::ConversationCreated,
        Topic::RoomCreated,
        Topic::MessageCreated,
        Topic::RoomDeleted,
        Topic::RoomMembership,
    ];

    /// Dotted name used for SSE event types.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConversationCreated => "conversation.created",
            Self::RoomCreated => "room.created",
            Self::MessageCreated => "message.created",
            Self::RoomDeleted => "room.deleted",
            Self::RoomMembership => "room.membership",
        }
    }

    /// Identifier safe to use as a PostgreSQL `LISTEN` channel.
    #[must_use]
    pub const fn channel(self) -> &'static str {
        match self {
            Self::ConversationCreated => "parley_conversation_created",
            Self::RoomCreated => "parley_room_created",
            Self::MessageCreated => "parley_message_created",
            Self::RoomDeleted => "parley_room_deleted",
            Self::RoomMembership => "parley_room_membership",
        }
    }

    #[must_use]
    pub fn from_channel(channel: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|topic| topic.channel() == channel)
    }

    #[must_use]
    pub fn thread_created(kind: ThreadKind) -> Self {
        match kind {
            ThreadKind::Conversation => Self::ConversationCreated,
            ThreadKind::Room => Self::RoomCreated,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload published on [`Topic::MessageCreated`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageCreatedEvent {
    pub thread_id: Uuid,
    pub kind: ThreadKind,
    pub members: Vec<Uuid>,
    pub message: MessageView,
}

/// Payload published on the thread-created topics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadCreatedEvent {
    pub thread: ThreadView,
}

/// Payload published on [`Topic::RoomDeleted`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomDeletedEvent {
    pub room_id: Uuid,
    pub members: Vec<Uuid>,
}

/// Payload published on [`Topic::RoomMembership`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomMembershipEvent {
    pub room_id: Uuid,
    pub member: Uuid,
    pub joined: bool,
    pub members: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_round_trip() {
        for topic in Topic::ALL {
            assert_eq!(Topic::from_channel(topic.channel()), Some(topic));
        }
        assert_eq!(Topic::from_channel("parley_unknown"), None);
    }

    #[test]
    fn thread_created_topic_follows_kind() {
        assert_eq!(
            Topic::thread_created(ThreadKind::Conversation),
            Topic::ConversationCreated
        );
        assert_eq!(Topic::thread_created(ThreadKind::Room), Topic::RoomCreated);
    }
}
