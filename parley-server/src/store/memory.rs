use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use shared::models::{
    MemberProfile, Message, NewThread, PushSubscription, Thread, ThreadKind, pair_key,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    MemberDirectory, StoreError, StoreResult, ThreadStore, last_member_conflict, thread_not_found,
};

#[derive(Debug, Default)]
struct ThreadTable {
    threads: HashMap<Uuid, Thread>,
    pairs: HashMap<String, Uuid>,
}

/// Thread store held in process memory.
///
/// Every mutation happens under one write lock, which gives
/// `append_and_set_last` its atomicity.
#[derive(Debug, Default)]
pub struct MemoryThreadStore {
    inner: RwLock<ThreadTable>,
}

impl MemoryThreadStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn without_messages(thread: &Thread) -> Thread {
    Thread {
        messages: Vec::new(),
        ..thread.clone()
    }
}

fn to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn insert(&self, thread: NewThread, initial: Option<Message>) -> StoreResult<Thread> {
        let mut table = self.inner.write().await;

        let pair = match (thread.kind, thread.members.as_slice()) {
            (ThreadKind::Conversation, [a, b]) => Some(pair_key(*a, *b)),
            _ => None,
        };
        if let Some(key) = pair.as_ref() {
            if table.pairs.contains_key(key) {
                return Err(StoreError::Conflict(format!(
                    "conversation for pair {key} already exists"
                )));
            }
        }

        let stored = Thread {
            id: Uuid::new_v4(),
            kind: thread.kind,
            name: thread.name,
            owner: thread.owner,
            members: thread.members,
            messages: initial.iter().cloned().collect(),
            last_message: initial,
            created_at: Utc::now(),
        };

        if let Some(key) = pair {
            table.pairs.insert(key, stored.id);
        }
        table.threads.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: Uuid, include_messages: bool) -> StoreResult<Thread> {
        let table = self.inner.read().await;
        let thread = table.threads.get(&id).ok_or_else(|| thread_not_found(id))?;
        Ok(if include_messages {
            thread.clone()
        } else {
            without_messages(thread)
        })
    }

    async fn append_and_set_last(&self, id: Uuid, message: &Message) -> StoreResult<Thread> {
        let mut table = self.inner.write().await;
        let thread = table
            .threads
            .get_mut(&id)
            .ok_or_else(|| thread_not_found(id))?;
        thread.messages.push(message.clone());
        thread.last_message = Some(message.clone());
        Ok(without_messages(thread))
    }

    async fn find_conversation(&self, a: Uuid, b: Uuid) -> StoreResult<Option<Thread>> {
        let table = self.inner.read().await;
        Ok(table
            .threads
            .values()
            .find(|thread| {
                thread.kind == ThreadKind::Conversation
                    && thread.members.len() == 2
                    && thread.has_member(a)
                    && thread.has_member(b)
            })
            .map(without_messages))
    }

    async fn list_for_member(&self, member: Uuid, kind: ThreadKind) -> StoreResult<Vec<Thread>> {
        let table = self.inner.read().await;
        Ok(table
            .threads
            .values()
            .filter(|thread| thread.kind == kind && thread.has_member(member))
            .map(without_messages)
            .collect())
    }

    async fn message_count(&self, id: Uuid) -> StoreResult<u64> {
        let table = self.inner.read().await;
        table
            .threads
            .get(&id)
            .map(|thread| to_u64(thread.messages.len()))
            .ok_or_else(|| thread_not_found(id))
    }

    async fn messages_newest_first(
        &self,
        id: Uuid,
        skip: u64,
        limit: u64,
    ) -> StoreResult<Vec<Message>> {
        let table = self.inner.read().await;
        let thread = table.threads.get(&id).ok_or_else(|| thread_not_found(id))?;
        Ok(thread
            .messages
            .iter()
            .rev()
            .skip(to_usize(skip))
            .take(to_usize(limit))
            .cloned()
            .collect())
    }

    async fn add_member(&self, id: Uuid, member: Uuid) -> StoreResult<Thread> {
        let mut table = self.inner.write().await;
        let thread = table
            .threads
            .get_mut(&id)
            .ok_or_else(|| thread_not_found(id))?;
        if !thread.has_member(member) {
            thread.members.push(member);
        }
        Ok(without_messages(thread))
    }

    async fn remove_member(&self, id: Uuid, member: Uuid) -> StoreResult<Thread> {
        let mut table = self.inner.write().await;
        let thread = table
            .threads
            .get_mut(&id)
            .ok_or_else(|| thread_not_found(id))?;
        if !thread.has_member(member) {
            return Err(StoreError::NotFound(format!(
                "member {member} is not in thread {id}"
            )));
        }
        if thread.members.len() <= 1 {
            return Err(last_member_conflict(id, member));
        }
        thread.members.retain(|existing| *existing != member);
        Ok(without_messages(thread))
    }

    async fn delete(&self, id: Uuid) -> StoreResult<Thread> {
        let mut table = self.inner.write().await;
        let thread = table
            .threads
            .remove(&id)
            .ok_or_else(|| thread_not_found(id))?;
        table.pairs.retain(|_, thread_id| *thread_id != id);
        Ok(thread)
    }
}

#[derive(Debug, Default, Clone)]
struct MemberRecord {
    profile: Option<MemberProfile>,
    rooms: Vec<Uuid>,
    subscriptions: Vec<PushSubscription>,
}

/// Member directory held in process memory.
#[derive(Debug, Default)]
pub struct MemoryMemberDirectory {
    members: RwLock<HashMap<Uuid, MemberRecord>>,
}

impl MemoryMemberDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemberDirectory for MemoryMemberDirectory {
    async fn resolve_member(&self, id: Uuid) -> StoreResult<Option<MemberProfile>> {
        let members = self.members.read().await;
        Ok(members.get(&id).and_then(|record| record.profile.clone()))
    }

    async fn upsert_member(&self, profile: MemberProfile) -> StoreResult<MemberProfile> {
        let mut members = self.members.write().await;
        members.entry(profile.id).or_default().profile = Some(profile.clone());
        Ok(profile)
    }

    async fn record_room_created(&self, member: Uuid, room: Uuid) -> StoreResult<()> {
        let mut members = self.members.write().await;
        let record = members.entry(member).or_default();
        if !record.rooms.contains(&room) {
            record.rooms.push(room);
        }
        Ok(())
    }

    async fn record_room_left(&self, member: Uuid, room: Uuid) -> StoreResult<()> {
        let mut members = self.members.write().await;
        if let Some(record) = members.get_mut(&member) {
            record.rooms.retain(|existing| *existing != room);
        }
        Ok(())
    }

    async fn rooms_of(&self, member: Uuid) -> StoreResult<Vec<Uuid>> {
        let members = self.members.read().await;
        Ok(members
            .get(&member)
            .map(|record| record.rooms.clone())
            .unwrap_or_default())
    }

    async fn subscriptions(&self, member: Uuid) -> StoreResult<Vec<PushSubscription>> {
        let members = self.members.read().await;
        Ok(members
            .get(&member)
            .map(|record| record.subscriptions.clone())
            .unwrap_or_default())
    }

    async fn add_subscription(
        &self,
        member: Uuid,
        subscription: &PushSubscription,
    ) -> StoreResult<bool> {
        let mut members = self.members.write().await;
        let record = members.entry(member).or_default();
        if record
            .subscriptions
            .iter()
            .any(|existing| existing.same_triple(subscription))
        {
            return Ok(false);
        }
        record.subscriptions.push(subscription.clone());
        Ok(true)
    }

    async fn remove_subscriptions(
        &self,
        member: Uuid,
        subscriptions: &[PushSubscription],
    ) -> StoreResult<usize> {
        let mut members = self.members.write().await;
        let Some(record) = members.get_mut(&member) else {
            return Ok(0);
        };
        let before = record.subscriptions.len();
        record
            .subscriptions
            .retain(|existing| !subscriptions.iter().any(|dead| dead.same_triple(existing)));
        Ok(before - record.subscriptions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(author: Uuid, body: &str) -> Message {
        Message::new(author, Some(body.to_string()), Vec::new())
    }

    #[tokio::test]
    async fn append_sets_last_message_and_extends_log() {
        let store = MemoryThreadStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let thread = store
            .insert(NewThread::conversation(a, b), Some(message(a, "first")))
            .await
            .unwrap();

        let second = message(b, "second");
        let updated = store.append_and_set_last(thread.id, &second).await.unwrap();
        assert_eq!(updated.last_message.as_ref(), Some(&second));
        assert!(updated.messages.is_empty());

        let full = store.get(thread.id, true).await.unwrap();
        assert_eq!(full.messages.len(), 2);
        assert_eq!(full.messages.last(), Some(&second));
        assert_eq!(full.last_message.as_ref(), full.messages.last());
    }

    #[tokio::test]
    async fn append_to_missing_thread_is_not_found() {
        let store = MemoryThreadStore::new();
        let err = store
            .append_and_set_last(Uuid::new_v4(), &message(Uuid::new_v4(), "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_pair_conflicts_regardless_of_order() {
        let store = MemoryThreadStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store
            .insert(NewThread::conversation(a, b), None)
            .await
            .unwrap();
        let err = store
            .insert(NewThread::conversation(b, a), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn find_conversation_requires_both_members() {
        let store = MemoryThreadStore::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let thread = store
            .insert(NewThread::conversation(a, b), None)
            .await
            .unwrap();

        let found = store.find_conversation(b, a).await.unwrap().unwrap();
        assert_eq!(found.id, thread.id);
        assert!(store.find_conversation(a, c).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn window_is_newest_first() {
        let store = MemoryThreadStore::new();
        let author = Uuid::new_v4();
        let room = store
            .insert(NewThread::room(author, None, vec![]), None)
            .await
            .unwrap();
        for i in 0..5 {
            store
                .append_and_set_last(room.id, &message(author, &format!("m{i}")))
                .await
                .unwrap();
        }

        let window = store.messages_newest_first(room.id, 1, 2).await.unwrap();
        let bodies: Vec<_> = window.iter().filter_map(|m| m.body.as_deref()).collect();
        assert_eq!(bodies, vec!["m3", "m2"]);
        assert_eq!(store.message_count(room.id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn room_membership_changes() {
        let store = MemoryThreadStore::new();
        let (owner, guest) = (Uuid::new_v4(), Uuid::new_v4());
        let room = store
            .insert(NewThread::room(owner, Some("r".into()), vec![]), None)
            .await
            .unwrap();

        store.add_member(room.id, guest).await.unwrap();
        let joined = store.add_member(room.id, guest).await.unwrap();
        assert_eq!(joined.members, vec![owner, guest]);

        store.remove_member(room.id, guest).await.unwrap();
        let err = store.remove_member(room.id, guest).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn last_room_member_cannot_be_removed() {
        let store = MemoryThreadStore::new();
        let owner = Uuid::new_v4();
        let room = store
            .insert(NewThread::room(owner, None, vec![]), None)
            .await
            .unwrap();

        let err = store.remove_member(room.id, owner).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let stored = store.get(room.id, false).await.unwrap();
        assert_eq!(stored.members, vec![owner]);
    }

    #[tokio::test]
    async fn subscriptions_are_unique_by_triple() {
        let directory = MemoryMemberDirectory::new();
        let member = Uuid::new_v4();
        let sub = PushSubscription::new("https://push/1", "a1", "p1");

        assert!(directory.add_subscription(member, &sub).await.unwrap());
        assert!(!directory.add_subscription(member, &sub).await.unwrap());
        assert_eq!(directory.subscriptions(member).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_subscriptions_matches_all_three_fields() {
        let directory = MemoryMemberDirectory::new();
        let member = Uuid::new_v4();
        let keep = PushSubscription::new("https://push/1", "shared", "p1");
        let dead = PushSubscription::new("https://push/2", "shared", "p2");
        directory.add_subscription(member, &keep).await.unwrap();
        directory.add_subscription(member, &dead).await.unwrap();

        let removed = directory
            .remove_subscriptions(member, &[dead.clone()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(directory.subscriptions(member).await.unwrap(), vec![keep]);
    }

    #[tokio::test]
    async fn resolve_many_skips_unknown_members() {
        let directory = MemoryMemberDirectory::new();
        let known = MemberProfile {
            id: Uuid::new_v4(),
            username: "grace".into(),
            email: None,
            picture: None,
        };
        directory.upsert_member(known.clone()).await.unwrap();

        let resolved = directory.resolve_many(&[known.id, Uuid::new_v4()]).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved.get(&known.id), Some(&known));
    }
}
