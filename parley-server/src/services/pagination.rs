use std::sync::Arc;

use metrics::counter;
use shared::models::{MessagePage, page_counters};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{errors::MessagingError, hydrate::Hydrator};
use crate::store::{StoreResult, ThreadStore};

/// A page and, if it could not be built, why.
///
/// The page is always well-formed: on failure it is the zeroed page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    pub page: MessagePage,
    pub fault: Option<MessagingError>,
}

impl PageOutcome {
    fn failed(fault: MessagingError) -> Self {
        Self {
            page: MessagePage::empty(),
            fault: Some(fault),
        }
    }
}

/// Reverse-chronological windows over a thread's message log.
#[derive(Clone)]
pub struct PaginationEngine {
    threads: Arc<dyn ThreadStore>,
    hydrator: Hydrator,
}

impl std::fmt::Debug for PaginationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginationEngine").finish_non_exhaustive()
    }
}

impl PaginationEngine {
    pub fn new(threads: Arc<dyn ThreadStore>, hydrator: Hydrator) -> Self {
        Self { threads, hydrator }
    }

    /// Messages `skip..skip + limit` counted from the newest.
    #[instrument(skip(self))]
    pub async fn page(&self, thread_id: Uuid, skip: u64, limit: u64) -> PageOutcome {
        counter!("parley_page_requests_total").increment(1);
        match self.window(thread_id, skip, limit).await {
            Ok(page) => PageOutcome { page, fault: None },
            Err(err) => {
                warn!(error = %err, "page request failed");
                PageOutcome::failed(err.into())
            }
        }
    }

    async fn window(&self, thread_id: Uuid, skip: u64, limit: u64) -> StoreResult<MessagePage> {
        let total = self.threads.message_count(thread_id).await?;
        let (page_available, more_available) = page_counters(total, skip, limit);
        if total == 0 || limit == 0 || skip >= total {
            return Ok(MessagePage {
                messages: Vec::new(),
                page_available,
                more_available,
            });
        }

        let messages = self
            .threads
            .messages_newest_first(thread_id, skip, limit)
            .await?;
        Ok(MessagePage {
            messages: self.hydrator.messages(messages).await,
            page_available,
            more_available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemberDirectory, MemoryMemberDirectory, MemoryThreadStore};
    use shared::models::{AuthorRef, MemberProfile, Message, NewThread};

    async fn thread_with(count: usize) -> (PaginationEngine, Arc<MemoryThreadStore>, Uuid, Uuid) {
        let threads = Arc::new(MemoryThreadStore::new());
        let members = Arc::new(MemoryMemberDirectory::new());
        let author = Uuid::new_v4();
        let room = threads
            .insert(NewThread::room(author, None, vec![]), None)
            .await
            .unwrap();
        for n in 0..count {
            threads
                .append_and_set_last(room.id, &Message::new(author, Some(n.to_string()), vec![]))
                .await
                .unwrap();
        }
        let engine = PaginationEngine::new(threads.clone(), Hydrator::new(members));
        (engine, threads, room.id, author)
    }

    fn bodies(page: &MessagePage) -> Vec<String> {
        page.messages
            .iter()
            .filter_map(|message| message.body.clone())
            .collect()
    }

    #[tokio::test]
    async fn ten_messages_in_pages_of_five() {
        let (engine, _, thread, _) = thread_with(10).await;

        let first = engine.page(thread, 0, 5).await;
        assert!(first.fault.is_none());
        assert_eq!(first.page.page_available, 2);
        assert!(first.page.more_available);
        assert_eq!(bodies(&first.page), ["9", "8", "7", "6", "5"]);

        let second = engine.page(thread, 5, 5).await;
        assert_eq!(second.page.page_available, 2);
        assert!(!second.page.more_available);
        assert_eq!(bodies(&second.page), ["4", "3", "2", "1", "0"]);
    }

    #[tokio::test]
    async fn empty_thread_yields_zeroed_page() {
        let (engine, _, thread, _) = thread_with(0).await;
        for (skip, limit) in [(0, 5), (10, 1), (0, 0)] {
            let outcome = engine.page(thread, skip, limit).await;
            assert_eq!(outcome.page, MessagePage::empty());
            assert!(outcome.fault.is_none());
        }
    }

    #[tokio::test]
    async fn zero_limit_does_not_divide() {
        let (engine, _, thread, _) = thread_with(3).await;
        let outcome = engine.page(thread, 0, 0).await;
        assert_eq!(outcome.page.page_available, 0);
        assert!(outcome.page.more_available);
        assert!(outcome.page.messages.is_empty());
    }

    #[tokio::test]
    async fn skip_past_the_end_is_empty() {
        let (engine, _, thread, _) = thread_with(3).await;
        let outcome = engine.page(thread, 10, 5).await;
        assert!(outcome.page.messages.is_empty());
        assert_eq!(outcome.page.page_available, 1);
        assert!(!outcome.page.more_available);
    }

    #[tokio::test]
    async fn missing_thread_reports_fault_with_zeroed_page() {
        let (engine, _, _, _) = thread_with(0).await;
        let outcome = engine.page(Uuid::new_v4(), 0, 5).await;
        assert_eq!(outcome.page, MessagePage::empty());
        assert_eq!(outcome.fault.map(|fault| fault.code()), Some("not_found"));
    }

    #[tokio::test]
    async fn page_count_tracks_new_messages() {
        let (engine, threads, thread, author) = thread_with(5).await;
        assert_eq!(engine.page(thread, 0, 5).await.page.page_available, 1);
        threads
            .append_and_set_last(thread, &Message::new(author, Some("6".into()), vec![]))
            .await
            .unwrap();
        assert_eq!(engine.page(thread, 0, 5).await.page.page_available, 2);
    }

    #[tokio::test]
    async fn authors_are_hydrated_when_known() {
        let threads = Arc::new(MemoryThreadStore::new());
        let members = Arc::new(MemoryMemberDirectory::new());
        let ada = members
            .upsert_member(MemberProfile {
                id: Uuid::new_v4(),
                username: "ada".into(),
                email: None,
                picture: None,
            })
            .await
            .unwrap();
        let stranger = Uuid::new_v4();
        let room = threads
            .insert(NewThread::room(ada.id, None, vec![stranger]), None)
            .await
            .unwrap();
        for author in [ada.id, stranger] {
            threads
                .append_and_set_last(room.id, &Message::new(author, Some("x".into()), vec![]))
                .await
                .unwrap();
        }

        let engine = PaginationEngine::new(threads, Hydrator::new(members));
        let page = engine.page(room.id, 0, 10).await.page;
        assert_eq!(page.messages[0].author, AuthorRef::Unresolved(stranger));
        assert_eq!(page.messages[1].author, AuthorRef::Member(ada));
    }
}
