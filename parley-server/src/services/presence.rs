use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use metrics::gauge;
use uuid::Uuid;

/// Live stream connections per member.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    connections: Mutex<HashMap<Uuid, usize>>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection that lasts as long as the returned guard.
    #[must_use]
    pub fn connect(self: &Arc<Self>, member: Uuid) -> PresenceGuard {
        let total = {
            let mut connections = self.lock();
            *connections.entry(member).or_default() += 1;
            connections.values().sum::<usize>()
        };
        record_total(total);
        PresenceGuard {
            tracker: Arc::clone(self),
            member,
        }
    }

    #[must_use]
    pub fn is_online(&self, member: Uuid) -> bool {
        self.connections(member) > 0
    }

    #[must_use]
    pub fn connections(&self, member: Uuid) -> usize {
        self.lock().get(&member).copied().unwrap_or_default()
    }

    fn disconnect(&self, member: Uuid) {
        let total = {
            let mut connections = self.lock();
            if let Some(count) = connections.get_mut(&member) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    connections.remove(&member);
                }
            }
            connections.values().sum::<usize>()
        };
        record_total(total);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, usize>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_total(total: usize) {
    gauge!("parley_sse_connections").set(total as f64);
}

/// Decrements the member's connection count when dropped.
#[derive(Debug)]
pub struct PresenceGuard {
    tracker: Arc<PresenceTracker>,
    member: Uuid,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.tracker.disconnect(self.member);
    }
}
