//! Domain events returned by store operations and their side effects.
//!
//! Services never publish directly. They return [`DomainEvent`] values and
//! the caller hands them to an [`EventDispatcher`], which publishes fanout
//! payloads and schedules push delivery.

use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use shared::models::{
    MessageCreatedEvent, MessageView, RoomDeletedEvent, RoomMembershipEvent, ThreadCreatedEvent,
    ThreadKind, ThreadView, Topic,
};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{presence::PresenceTracker, push_service::PushService};
use crate::fanout::FanoutBus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    ThreadCreated {
        thread: ThreadView,
    },
    MessageAppended {
        thread_id: Uuid,
        kind: ThreadKind,
        members: Vec<Uuid>,
        message: MessageView,
    },
    /// A direct message the recipient should be told about out of band.
    DirectMessageAdded {
        recipient: Uuid,
        sender: Uuid,
        thread_id: Uuid,
        notification: String,
    },
    RoomDeleted {
        room_id: Uuid,
        members: Vec<Uuid>,
    },
    RoomMembershipChanged {
        room_id: Uuid,
        member: Uuid,
        joined: bool,
        members: Vec<Uuid>,
    },
}

impl DomainEvent {
    /// Topic and payload to publish, if this event is fanned out.
    pub fn fanout(&self) -> Option<Result<(Topic, Value), serde_json::Error>> {
        let encoded = match self {
            Self::ThreadCreated { thread } => serde_json::to_value(ThreadCreatedEvent {
                thread: thread.clone(),
            })
            .map(|payload| (Topic::thread_created(thread.kind), payload)),
            Self::MessageAppended {
                thread_id,
                kind,
                members,
                message,
            } => serde_json::to_value(MessageCreatedEvent {
                thread_id: *thread_id,
                kind: *kind,
                members: members.clone(),
                message: message.clone(),
            })
            .map(|payload| (Topic::MessageCreated, payload)),
            Self::RoomDeleted { room_id, members } => serde_json::to_value(RoomDeletedEvent {
                room_id: *room_id,
                members: members.clone(),
            })
            .map(|payload| (Topic::RoomDeleted, payload)),
            Self::RoomMembershipChanged {
                room_id,
                member,
                joined,
                members,
            } => serde_json::to_value(RoomMembershipEvent {
                room_id: *room_id,
                member: *member,
                joined: *joined,
                members: members.clone(),
            })
            .map(|payload| (Topic::RoomMembership, payload)),
            Self::DirectMessageAdded { .. } => return None,
        };
        Some(encoded)
    }
}

/// Formats the push text for a direct message.
#[must_use]
pub fn direct_message_notification(sender: &str, body: &str) -> String {
    format!("New message from {sender}: {body}")
}

#[derive(Clone)]
pub struct EventDispatcher {
    bus: Arc<dyn FanoutBus>,
    push: Option<PushService>,
    presence: Arc<PresenceTracker>,
    skip_when_online: bool,
    tasks: TaskTracker,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("push_enabled", &self.push.is_some())
            .field("skip_when_online", &self.skip_when_online)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    pub fn new(
        bus: Arc<dyn FanoutBus>,
        push: Option<PushService>,
        presence: Arc<PresenceTracker>,
        skip_when_online: bool,
    ) -> Self {
        Self {
            bus,
            push,
            presence,
            skip_when_online,
            tasks: TaskTracker::new(),
        }
    }

    /// Publishes fanout payloads and spawns push delivery. Nothing here
    /// fails the operation that produced the events.
    pub async fn dispatch(&self, events: Vec<DomainEvent>) {
        for event in events {
            match event.fanout() {
                Some(Ok((topic, payload))) => {
                    if let Err(err) = self.bus.publish(topic, payload).await {
                        counter!("parley_fanout_errors_total", "topic" => topic.as_str())
                            .increment(1);
                        warn!(%topic, error = %err, "fanout publish failed");
                    }
                }
                Some(Err(err)) => warn!(error = %err, "failed to encode fanout payload"),
                None => {}
            }

            if let DomainEvent::DirectMessageAdded {
                recipient,
                thread_id,
                notification,
                ..
            } = event
            {
                self.schedule_push(recipient, thread_id, notification);
            }
        }
    }

    fn schedule_push(&self, recipient: Uuid, thread_id: Uuid, notification: String) {
        let Some(push) = self.push.clone() else {
            return;
        };
        if self.skip_when_online && self.presence.is_online(recipient) {
            debug!(%recipient, %thread_id, "recipient online; skipping push");
            return;
        }
        self.tasks.spawn(async move {
            push.deliver(recipient, &notification).await;
        });
    }

    /// Waits for every push task spawned so far.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
