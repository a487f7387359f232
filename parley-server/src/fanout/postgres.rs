use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde_json::{Value, json};
use shared::{config::server::FanoutConfig, models::Topic};
use sqlx::{PgPool, postgres::PgListener, types::Json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{FanoutBus, FanoutError, LocalBus, Subscription};

/// Postgres rejects NOTIFY payloads of 8000 bytes or more.
pub const NOTIFY_PAYLOAD_LIMIT: usize = 7_999;

/// Spooled payloads older than this are pruned on the next spool write.
const SPOOL_RETENTION_SECONDS: f64 = 300.0;

const SPOOL_KEY: &str = "$spool";

/// Delay before reconnect attempt `attempt` (1-based): grows linearly by
/// `step` and never exceeds `cap`.
#[must_use]
pub fn reconnect_delay(attempt: u32, step: Duration, cap: Duration) -> Duration {
    step.saturating_mul(attempt).min(cap)
}

/// Channel text announcing a spooled payload.
fn spool_reference(id: i64) -> String {
    json!({ SPOOL_KEY: id }).to_string()
}

/// A notification as received by the relay.
#[derive(Debug, PartialEq)]
enum Notice {
    Inline(Value),
    Spooled(i64),
}

fn decode_notice(raw: &str) -> Result<Notice, serde_json::Error> {
    let value: Value = serde_json::from_str(raw)?;
    let spooled = value
        .as_object()
        .filter(|object| object.len() == 1)
        .and_then(|object| object.get(SPOOL_KEY))
        .and_then(Value::as_i64);
    Ok(match spooled {
        Some(id) => Notice::Spooled(id),
        None => Notice::Inline(value),
    })
}

/// Cross-process bus over `LISTEN/NOTIFY`.
///
/// Payloads that fit go straight to `pg_notify`. Larger ones are written to
/// `parley.fanout_spool` and announced by id in the same transaction. A
/// relay task listens on every topic channel, resolves spooled ids and
/// republishes into a [`LocalBus`], which is what subscribers of this
/// process attach to.
#[derive(Debug)]
pub struct PgBus {
    pool: PgPool,
    local: LocalBus,
    shutdown: CancellationToken,
}

impl PgBus {
    /// Builds the bus without starting the relay.
    #[must_use]
    pub fn new(pool: PgPool, config: &FanoutConfig) -> Self {
        Self {
            pool,
            local: LocalBus::new(config.channel_capacity),
            shutdown: CancellationToken::new(),
        }
    }

    /// Builds the bus and spawns the relay task on the current runtime.
    #[must_use]
    pub fn start(pool: PgPool, config: &FanoutConfig) -> Self {
        let bus = Self::new(pool, config);
        let relay = Relay {
            pool: bus.pool.clone(),
            local: bus.local.clone(),
            step: Duration::from_millis(config.reconnect_step_ms),
            cap: Duration::from_millis(config.reconnect_cap_ms),
            shutdown: bus.shutdown.clone(),
        };
        tokio::spawn(relay.run());
        bus
    }

    async fn publish_spooled(&self, topic: Topic, payload: &Value) -> Result<(), FanoutError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM parley.fanout_spool WHERE created_at < now() - make_interval(secs => $1)",
        )
        .bind(SPOOL_RETENTION_SECONDS)
        .execute(&mut *tx)
        .await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO parley.fanout_spool (topic, payload) VALUES ($1, $2) RETURNING id",
        )
        .bind(topic.as_str())
        .bind(Json(payload))
        .fetch_one(&mut *tx)
        .await?;
        // Delivered on commit, after the row is visible.
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(topic.channel())
            .bind(spool_reference(id))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(%topic, spool_id = id, "fanout payload spooled");
        Ok(())
    }
}

impl Drop for PgBus {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl FanoutBus for PgBus {
    async fn publish(&self, topic: Topic, payload: Value) -> Result<(), FanoutError> {
        let encoded = serde_json::to_string(&payload)?;
        if encoded.len() <= NOTIFY_PAYLOAD_LIMIT {
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(topic.channel())
                .bind(&encoded)
                .execute(&self.pool)
                .await?;
        } else {
            self.publish_spooled(topic, &payload).await?;
            counter!("parley_fanout_spooled_total", "topic" => topic.as_str()).increment(1);
        }

        counter!("parley_fanout_published_total", "topic" => topic.as_str()).increment(1);
        Ok(())
    }

    fn subscribe(&self, topic: Topic) -> Subscription {
        self.local.subscribe(topic)
    }
}

struct Relay {
    pool: PgPool,
    local: LocalBus,
    step: Duration,
    cap: Duration,
    shutdown: CancellationToken,
}

impl Relay {
    async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            match self.listen(&mut attempt).await {
                Ok(()) => break,
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    let delay = reconnect_delay(attempt, self.step, self.cap);
                    counter!("parley_fanout_reconnects_total").increment(1);
                    warn!(
                        error = %err,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "fanout relay disconnected; reconnecting"
                    );
                    tokio::select! {
                        () = self.shutdown.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        debug!("fanout relay stopped");
    }

    /// Returns `Ok` only on shutdown.
    async fn listen(&self, attempt: &mut u32) -> Result<(), FanoutError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener
            .listen_all(Topic::ALL.iter().map(|topic| topic.channel()))
            .await?;
        info!(channels = Topic::ALL.len(), "fanout relay listening");
        *attempt = 0;

        loop {
            let notification = tokio::select! {
                () = self.shutdown.cancelled() => return Ok(()),
                notification = listener.try_recv() => notification?,
            };

            let Some(notification) = notification else {
                return Err(FanoutError::Transport("listener connection lost".into()));
            };

            let Some(topic) = Topic::from_channel(notification.channel()) else {
                debug!(channel = notification.channel(), "ignoring unknown channel");
                continue;
            };

            let payload = match decode_notice(notification.payload()) {
                Ok(Notice::Inline(payload)) => payload,
                Ok(Notice::Spooled(id)) => match self.unspool(id).await? {
                    Some(payload) => payload,
                    None => {
                        warn!(%topic, spool_id = id, "spooled fanout payload already pruned");
                        continue;
                    }
                },
                Err(err) => {
                    warn!(%topic, error = %err, "dropping undecodable fanout payload");
                    continue;
                }
            };
            self.local.deliver(topic, payload)?;
        }
    }

    async fn unspool(&self, id: i64) -> Result<Option<Value>, FanoutError> {
        let payload: Option<Json<Value>> =
            sqlx::query_scalar("SELECT payload FROM parley.fanout_spool WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(payload.map(|Json(payload)| payload))
    }
}
