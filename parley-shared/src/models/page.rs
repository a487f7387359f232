use serde::{Deserialize, Serialize};

use super::thread::MessageView;

/// A reverse-chronological window over a thread's messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    /// Number of pages of the requested size given the current total.
    pub page_available: u64,
    /// Whether messages exist beyond this window.
    pub more_available: bool,
}

impl MessagePage {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Page counters derived from a total count and a window.
#[must_use]
pub fn page_counters(total: u64, skip: u64, limit: u64) -> (u64, bool) {
    if total == 0 {
        return (0, false);
    }
    // Zero limit: no page size, but the empty window still has more after it.
    let pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
    let more = total > skip.saturating_add(limit);
    (pages, more)
}
