use std::{collections::HashMap, sync::Arc};

use shared::models::{AuthorRef, MemberProfile, Message, MessageView, Thread, ThreadView};
use uuid::Uuid;

use crate::store::MemberDirectory;

/// Turns stored ids into member profiles.
///
/// Lookups that fail or miss leave the id as [`AuthorRef::Unresolved`];
/// hydration itself never fails.
#[derive(Clone)]
pub struct Hydrator {
    members: Arc<dyn MemberDirectory>,
}

impl std::fmt::Debug for Hydrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hydrator").finish_non_exhaustive()
    }
}

impl Hydrator {
    pub fn new(members: Arc<dyn MemberDirectory>) -> Self {
        Self { members }
    }

    pub async fn thread(&self, thread: Thread, include_messages: bool) -> ThreadView {
        let mut ids = thread.members.clone();
        if let Some(last) = &thread.last_message {
            ids.push(last.author);
        }
        if include_messages {
            ids.extend(thread.messages.iter().map(|message| message.author));
        }
        let profiles = self.resolve(ids).await;

        ThreadView {
            id: thread.id,
            kind: thread.kind,
            name: thread.name,
            owner: thread.owner,
            members: thread
                .members
                .iter()
                .map(|id| author_ref(&profiles, *id))
                .collect(),
            last_message: thread
                .last_message
                .map(|message| message_view(&profiles, message)),
            messages: include_messages.then(|| {
                thread
                    .messages
                    .into_iter()
                    .map(|message| message_view(&profiles, message))
                    .collect()
            }),
            created_at: thread.created_at,
        }
    }

    pub async fn threads(&self, threads: Vec<Thread>) -> Vec<ThreadView> {
        let ids = threads
            .iter()
            .flat_map(|thread| {
                thread
                    .members
                    .iter()
                    .copied()
                    .chain(thread.last_message.as_ref().map(|last| last.author))
            })
            .collect();
        let profiles = self.resolve(ids).await;

        threads
            .into_iter()
            .map(|thread| ThreadView {
                id: thread.id,
                kind: thread.kind,
                name: thread.name,
                owner: thread.owner,
                members: thread
                    .members
                    .iter()
                    .map(|id| author_ref(&profiles, *id))
                    .collect(),
                last_message: thread
                    .last_message
                    .map(|message| message_view(&profiles, message)),
                messages: None,
                created_at: thread.created_at,
            })
            .collect()
    }

    pub async fn messages(&self, messages: Vec<Message>) -> Vec<MessageView> {
        let profiles = self
            .resolve(messages.iter().map(|message| message.author).collect())
            .await;
        messages
            .into_iter()
            .map(|message| message_view(&profiles, message))
            .collect()
    }

    async fn resolve(&self, mut ids: Vec<Uuid>) -> HashMap<Uuid, MemberProfile> {
        ids.sort_unstable();
        ids.dedup();
        self.members.resolve_many(&ids).await
    }
}

fn author_ref(profiles: &HashMap<Uuid, MemberProfile>, id: Uuid) -> AuthorRef {
    profiles
        .get(&id)
        .cloned()
        .map_or(AuthorRef::Unresolved(id), AuthorRef::Member)
}

fn message_view(profiles: &HashMap<Uuid, MemberProfile>, message: Message) -> MessageView {
    let author = author_ref(profiles, message.author);
    MessageView::new(message, author)
}
