use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{
    MemberProfile, Message, NewThread, PushSubscription, Thread, ThreadKind, pair_key,
};
use sqlx::{PgPool, types::Json};
use tracing::instrument;
use uuid::Uuid;

use super::{
    MemberDirectory, StoreError, StoreResult, ThreadStore, last_member_conflict, thread_not_found,
};

const THREAD_COLUMNS: &str =
    "id, kind, name, owner_id, members, NULL::JSONB AS messages, last_message, created_at";
const THREAD_COLUMNS_WITH_MESSAGES: &str =
    "id, kind, name, owner_id, members, messages, last_message, created_at";

#[derive(sqlx::FromRow)]
struct ThreadRow {
    id: Uuid,
    kind: String,
    name: Option<String>,
    owner_id: Option<Uuid>,
    members: Vec<Uuid>,
    messages: Option<Json<Vec<Message>>>,
    last_message: Option<Json<Message>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ThreadRow> for Thread {
    type Error = StoreError;

    fn try_from(row: ThreadRow) -> Result<Self, Self::Error> {
        let kind = ThreadKind::try_from(row.kind.as_str())
            .map_err(|err| StoreError::Backend(format!("thread {}: {err}", row.id)))?;
        Ok(Thread {
            id: row.id,
            kind,
            name: row.name,
            owner: row.owner_id,
            members: row.members,
            messages: row.messages.map(|Json(messages)| messages).unwrap_or_default(),
            last_message: row.last_message.map(|Json(message)| message),
            created_at: row.created_at,
        })
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Thread store over the `parley.threads` table, one row per thread with
/// the message log kept as a JSONB array.
#[derive(Clone)]
pub struct PgThreadStore {
    pool: PgPool,
}

impl fmt::Debug for PgThreadStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgThreadStore").finish()
    }
}

impl PgThreadStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_thread(&self, sql: &str, id: Uuid) -> StoreResult<Thread> {
        let row = sqlx::query_as::<_, ThreadRow>(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| thread_not_found(id))?.try_into()
    }
}

#[async_trait]
impl ThreadStore for PgThreadStore {
    #[instrument(name = "store.insert_thread", skip(self, thread, initial), err)]
    async fn insert(&self, thread: NewThread, initial: Option<Message>) -> StoreResult<Thread> {
        let pair = match (thread.kind, thread.members.as_slice()) {
            (ThreadKind::Conversation, [a, b]) => Some(pair_key(*a, *b)),
            _ => None,
        };
        let messages: Vec<Message> = initial.iter().cloned().collect();

        let row = sqlx::query_as::<_, ThreadRow>(&format!(
            "INSERT INTO parley.threads (id, kind, name, owner_id, members, pair_key, messages, last_message)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {THREAD_COLUMNS_WITH_MESSAGES}"
        ))
        .bind(Uuid::new_v4())
        .bind(thread.kind.as_str())
        .bind(&thread.name)
        .bind(thread.owner)
        .bind(&thread.members)
        .bind(pair)
        .bind(Json(&messages))
        .bind(initial.as_ref().map(Json))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get(&self, id: Uuid, include_messages: bool) -> StoreResult<Thread> {
        let columns = if include_messages {
            THREAD_COLUMNS_WITH_MESSAGES
        } else {
            THREAD_COLUMNS
        };
        self.fetch_thread(
            &format!("SELECT {columns} FROM parley.threads WHERE id = $1"),
            id,
        )
        .await
    }

    #[instrument(name = "store.append_and_set_last", skip(self, message), err)]
    async fn append_and_set_last(&self, id: Uuid, message: &Message) -> StoreResult<Thread> {
        // Single UPDATE: the row lock serializes concurrent appends.
        let row = sqlx::query_as::<_, ThreadRow>(&format!(
            "SELECT {THREAD_COLUMNS} FROM parley.sp_append_message($1, $2)"
        ))
        .bind(id)
        .bind(Json(message))
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| thread_not_found(id))?.try_into()
    }

    async fn find_conversation(&self, a: Uuid, b: Uuid) -> StoreResult<Option<Thread>> {
        let row = sqlx::query_as::<_, ThreadRow>(&format!(
            "SELECT {THREAD_COLUMNS} FROM parley.threads
             WHERE kind = 'conversation'
               AND members @> ARRAY[$1, $2]::UUID[]
               AND cardinality(members) = 2
             LIMIT 1"
        ))
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Thread::try_from).transpose()
    }

    async fn list_for_member(&self, member: Uuid, kind: ThreadKind) -> StoreResult<Vec<Thread>> {
        let rows = sqlx::query_as::<_, ThreadRow>(&format!(
            "SELECT {THREAD_COLUMNS} FROM parley.threads
             WHERE kind = $2 AND $1 = ANY(members)"
        ))
        .bind(member)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Thread::try_from).collect()
    }

    async fn message_count(&self, id: Uuid) -> StoreResult<u64> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT jsonb_array_length(messages)::BIGINT FROM parley.threads WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        count
            .map(|value| u64::try_from(value).unwrap_or_default())
            .ok_or_else(|| thread_not_found(id))
    }

    async fn messages_newest_first(
        &self,
        id: Uuid,
        skip: u64,
        limit: u64,
    ) -> StoreResult<Vec<Message>> {
        let rows: Vec<Json<Message>> = sqlx::query_scalar(
            "SELECT m.message
             FROM parley.threads t
             CROSS JOIN LATERAL jsonb_array_elements(t.messages) WITH ORDINALITY AS m(message, position)
             WHERE t.id = $1
             ORDER BY m.position DESC
             OFFSET $2 LIMIT $3",
        )
        .bind(id)
        .bind(to_i64(skip))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|Json(message)| message).collect())
    }

    async fn add_member(&self, id: Uuid, member: Uuid) -> StoreResult<Thread> {
        self.fetch_member_update(
            &format!(
                "UPDATE parley.threads
                 SET members = CASE WHEN $2 = ANY(members) THEN members ELSE array_append(members, $2) END
                 WHERE id = $1
                 RETURNING {THREAD_COLUMNS}"
            ),
            id,
            member,
        )
        .await?
        .ok_or_else(|| thread_not_found(id))
    }

    async fn remove_member(&self, id: Uuid, member: Uuid) -> StoreResult<Thread> {
        let updated = self.fetch_member_update(
            &format!(
                "UPDATE parley.threads
                 SET members = array_remove(members, $2)
                 WHERE id = $1 AND $2 = ANY(members) AND cardinality(members) > 1
                 RETURNING {THREAD_COLUMNS}"
            ),
            id,
            member,
        )
        .await?;
        if let Some(thread) = updated {
            return Ok(thread);
        }

        let present: Option<bool> =
            sqlx::query_scalar("SELECT $2 = ANY(members) FROM parley.threads WHERE id = $1")
                .bind(id)
                .bind(member)
                .fetch_optional(&self.pool)
                .await?;
        match present {
            None => Err(thread_not_found(id)),
            Some(true) => Err(last_member_conflict(id, member)),
            Some(false) => Err(StoreError::NotFound(format!(
                "member {member} is not in thread {id}"
            ))),
        }
    }

    async fn delete(&self, id: Uuid) -> StoreResult<Thread> {
        self.fetch_thread(
            &format!("DELETE FROM parley.threads WHERE id = $1 RETURNING {THREAD_COLUMNS}"),
            id,
        )
        .await
    }
}

impl PgThreadStore {
    async fn fetch_member_update(
        &self,
        sql: &str,
        id: Uuid,
        member: Uuid,
    ) -> StoreResult<Option<Thread>> {
        let row = sqlx::query_as::<_, ThreadRow>(sql)
            .bind(id)
            .bind(member)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Thread::try_from).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    id: Uuid,
    username: String,
    email: Option<String>,
    picture: Option<String>,
}

impl From<MemberRow> for MemberProfile {
    fn from(row: MemberRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            picture: row.picture,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    endpoint: String,
    auth: String,
    p256dh: String,
}

/// Member directory over `parley.members`, `parley.member_rooms` and
/// `parley.push_subscriptions`.
#[derive(Clone)]
pub struct PgMemberDirectory {
    pool: PgPool,
}

impl fmt::Debug for PgMemberDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgMemberDirectory").finish()
    }
}

impl PgMemberDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemberDirectory for PgMemberDirectory {
    async fn resolve_member(&self, id: Uuid) -> StoreResult<Option<MemberProfile>> {
        let row = sqlx::query_as::<_, MemberRow>(
            "SELECT id, username, email, picture FROM parley.members WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(MemberProfile::from))
    }

    async fn upsert_member(&self, profile: MemberProfile) -> StoreResult<MemberProfile> {
        let row = sqlx::query_as::<_, MemberRow>(
            "INSERT INTO parley.members (id, username, email, picture)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE
               SET username = EXCLUDED.username,
                   email = EXCLUDED.email,
                   picture = EXCLUDED.picture,
                   updated_at = now()
             RETURNING id, username, email, picture",
        )
        .bind(profile.id)
        .bind(&profile.username)
        .bind(&profile.email)
        .bind(&profile.picture)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn record_room_created(&self, member: Uuid, room: Uuid) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO parley.member_rooms (member_id, room_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(member)
        .bind(room)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_room_left(&self, member: Uuid, room: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM parley.member_rooms WHERE member_id = $1 AND room_id = $2")
            .bind(member)
            .bind(room)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn rooms_of(&self, member: Uuid) -> StoreResult<Vec<Uuid>> {
        let rooms = sqlx::query_scalar(
            "SELECT room_id FROM parley.member_rooms WHERE member_id = $1 ORDER BY created_at",
        )
        .bind(member)
        .fetch_all(&self.pool)
        .await?;
        Ok(rooms)
    }

    async fn subscriptions(&self, member: Uuid) -> StoreResult<Vec<PushSubscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT endpoint, auth, p256dh FROM parley.push_subscriptions
             WHERE member_id = $1 ORDER BY created_at",
        )
        .bind(member)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| PushSubscription::new(row.endpoint, row.auth, row.p256dh))
            .collect())
    }

    async fn add_subscription(
        &self,
        member: Uuid,
        subscription: &PushSubscription,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO parley.push_subscriptions (member_id, endpoint, auth, p256dh)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT DO NOTHING",
        )
        .bind(member)
        .bind(&subscription.endpoint)
        .bind(&subscription.auth)
        .bind(&subscription.p256dh)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_subscriptions(
        &self,
        member: Uuid,
        subscriptions: &[PushSubscription],
    ) -> StoreResult<usize> {
        if subscriptions.is_empty() {
            return Ok(0);
        }

        let endpoints: Vec<&str> = subscriptions.iter().map(|s| s.endpoint.as_str()).collect();
        let auths: Vec<&str> = subscriptions.iter().map(|s| s.auth.as_str()).collect();
        let keys: Vec<&str> = subscriptions.iter().map(|s| s.p256dh.as_str()).collect();

        let result = sqlx::query(
            "DELETE FROM parley.push_subscriptions s
             USING UNNEST($2::TEXT[], $3::TEXT[], $4::TEXT[]) AS dead(endpoint, auth, p256dh)
             WHERE s.member_id = $1
               AND s.endpoint = dead.endpoint
               AND s.auth = dead.auth
               AND s.p256dh = dead.p256dh",
        )
        .bind(member)
        .bind(&endpoints)
        .bind(&auths)
        .bind(&keys)
        .execute(&self.pool)
        .await?;

        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}
