use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::Extension,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures_util::{Stream, StreamExt, future, stream};
use metrics::counter;
use serde_json::Value;
use shared::models::{
    MessageCreatedEvent, RoomDeletedEvent, RoomMembershipEvent, ThreadCreatedEvent, Topic,
};
use tracing::info;
use uuid::Uuid;

use crate::{app_state::AppState, middleware::auth::CurrentMember};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/stream", get(stream_events))
}

/// Live fanout events visible to the caller.
///
/// The first frame is a `ready` event; the member counts as online until the
/// client disconnects.
pub async fn stream_events(
    Extension(app_state): Extension<Arc<AppState>>,
    CurrentMember(member): CurrentMember,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(member_id = %member, "SSE stream opened");
    counter!("parley_sse_streams_total").increment(1);

    let presence = app_state.presence.connect(member);
    let topics = Topic::ALL.into_iter().map(|topic| {
        app_state
            .bus
            .subscribe(topic)
            .map(move |payload| (topic, payload))
    });

    let events = stream::select_all(topics)
        .filter(move |(topic, payload)| future::ready(visible_to(*topic, payload, member)))
        .map(move |(topic, payload)| {
            let _online = &presence;
            Ok(Event::default()
                .event(topic.as_str())
                .data(payload.to_string()))
        });
    let ready = stream::once(future::ready(Ok(Event::default()
        .event("ready")
        .data(member.to_string()))));

    let heartbeat = Duration::from_secs(app_state.config.fanout.heartbeat_seconds);
    Sse::new(ready.chain(events)).keep_alive(KeepAlive::new().interval(heartbeat).text("ping"))
}

/// Whether `member` may see an event published on `topic`.
///
/// Payloads that do not decode as their topic's event are dropped.
pub(crate) fn visible_to(topic: Topic, payload: &Value, member: Uuid) -> bool {
    match topic {
        Topic::MessageCreated => decode::<MessageCreatedEvent>(payload)
            .is_some_and(|event| event.members.contains(&member)),
        Topic::ConversationCreated | Topic::RoomCreated => decode::<ThreadCreatedEvent>(payload)
            .is_some_and(|event| event.thread.member_ids().contains(&member)),
        Topic::RoomDeleted => {
            decode::<RoomDeletedEvent>(payload).is_some_and(|event| event.members.contains(&member))
        }
        Topic::RoomMembership => decode::<RoomMembershipEvent>(payload)
            .is_some_and(|event| event.member == member || event.members.contains(&member)),
    }
}

fn decode<T: serde::de::DeserializeOwned>(payload: &Value) -> Option<T> {
    serde_json::from_value(payload.clone()).ok()
}
