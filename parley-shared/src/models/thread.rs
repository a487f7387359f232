use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::member::{AuthorRef, MemberProfile};

/// Distinguishes two-party conversations from multi-party rooms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKind {
    Conversation,
    Room,
}

impl ThreadKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Room => "room",
        }
    }
}

impl TryFrom<&str> for ThreadKind {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "conversation" => Ok(Self::Conversation),
            "room" => Ok(Self::Room),
            _ => Err("invalid thread kind"),
        }
    }
}

/// An attachment referenced by a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Media {
    /// MIME top-level type, e.g. `image`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Storage path relative to the media root.
    pub path: String,
}

/// A single immutable entry of a thread's message log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub author: Uuid,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub media: Vec<Media>,
}

impl Message {
    /// Builds a message stamped with the current time and a fresh id.
    #[must_use]
    pub fn new(author: Uuid, body: Option<String>, media: Vec<Media>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author,
            date: Utc::now(),
            body,
            media,
        }
    }

    /// Text used in notifications; attachments-only messages get a placeholder.
    #[must_use]
    pub fn preview(&self) -> &str {
        match self.body.as_deref() {
            Some(body) if !body.is_empty() => body,
            _ if !self.media.is_empty() => "[attachment]",
            _ => "",
        }
    }
}

/// Stored shape of a conversation or room.
///
/// `last_message` is either `None` (no messages yet) or equal to the final
/// element of `messages`. Listing operations return threads with an empty
/// `messages` vector; `last_message` stays populated in that case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thread {
    pub id: Uuid,
    pub kind: ThreadKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Uuid>,
    pub members: Vec<Uuid>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub last_message: Option<Message>,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    #[must_use]
    pub fn has_member(&self, member: Uuid) -> bool {
        self.members.contains(&member)
    }

    /// For a conversation, the participant that is not `member`.
    #[must_use]
    pub fn counterpart(&self, member: Uuid) -> Option<Uuid> {
        match self.kind {
            ThreadKind::Conversation => self.members.iter().copied().find(|id| *id != member),
            ThreadKind::Room => None,
        }
    }
}

/// Input for creating a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewThread {
    pub kind: ThreadKind,
    pub name: Option<String>,
    pub owner: Option<Uuid>,
    pub members: Vec<Uuid>,
}

impl NewThread {
    #[must_use]
    pub fn conversation(a: Uuid, b: Uuid) -> Self {
        Self {
            kind: ThreadKind::Conversation,
            name: None,
            owner: None,
            members: vec![a, b],
        }
    }

    #[must_use]
    pub fn room(owner: Uuid, name: Option<String>, members: Vec<Uuid>) -> Self {
        let mut all = vec![owner];
        for member in members {
            if !all.contains(&member) {
                all.push(member);
            }
        }
        Self {
            kind: ThreadKind::Room,
            name,
            owner: Some(owner),
            members: all,
        }
    }
}

/// Canonical, order-independent key for a two-party conversation.
#[must_use]
pub fn pair_key(a: Uuid, b: Uuid) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{low}:{high}")
}

/// Message with its author hydrated for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageView {
    pub id: Uuid,
    pub author: AuthorRef,
    pub date: DateTime<Utc>,
    pub body: Option<String>,
    pub media: Vec<Media>,
}

impl MessageView {
    #[must_use]
    pub fn new(message: Message, author: AuthorRef) -> Self {
        Self {
            id: message.id,
            author,
            date: message.date,
            body: message.body,
            media: message.media,
        }
    }
}

/// Thread with member references resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadView {
    pub id: Uuid,
    pub kind: ThreadKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Uuid>,
    pub members: Vec<AuthorRef>,
    pub last_message: Option<MessageView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessageView>>,
    pub created_at: DateTime<Utc>,
}

impl ThreadView {
    #[must_use]
    pub fn member_ids(&self) -> Vec<Uuid> {
        self.members.iter().map(AuthorRef::id).collect()
    }

    #[must_use]
    pub fn member_profile(&self, id: Uuid) -> Option<&MemberProfile> {
        self.members.iter().find_map(|member| match member {
            AuthorRef::Member(profile) if profile.id == id => Some(profile),
            _ => None,
        })
    }
}
