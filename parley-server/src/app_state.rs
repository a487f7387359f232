use std::sync::Arc;

use shared::config::server::Config;
use sqlx::PgPool;

use crate::{
    fanout::{FanoutBus, LocalBus},
    services::{
        EventDispatcher, HttpPushProvider, LocalMediaStorage, MediaService, MediaStorage,
        MessageStore, PaginationEngine, PresenceTracker, PushProvider, PushService, RoomService,
        ThreadResolver, push_provider::PushError,
    },
    store::{MemberDirectory, MemoryMemberDirectory, MemoryThreadStore, ThreadStore},
};

/// Collaborators the services are built over.
#[derive(Clone)]
pub struct Backends {
    pub threads: Arc<dyn ThreadStore>,
    pub members: Arc<dyn MemberDirectory>,
    pub bus: Arc<dyn FanoutBus>,
    pub push_provider: Arc<dyn PushProvider>,
    pub media_storage: Arc<dyn MediaStorage>,
    pub pool: Option<PgPool>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("pool", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}

impl Backends {
    /// Process-local backends: memory stores, a local bus, files under
    /// `media.root`, and the HTTP push provider.
    ///
    /// # Errors
    /// Returns [`PushError`] if the push HTTP client cannot be built.
    pub fn in_memory(config: &Config) -> Result<Self, PushError> {
        Ok(Self {
            threads: Arc::new(MemoryThreadStore::new()),
            members: Arc::new(MemoryMemberDirectory::new()),
            bus: Arc::new(LocalBus::new(config.fanout.channel_capacity)),
            push_provider: Arc::new(HttpPushProvider::new(&config.push)?),
            media_storage: Arc::new(LocalMediaStorage::new(config.media.root.clone())),
            pool: None,
        })
    }
}

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub(crate) config: Arc<Config>,
    pub(crate) pool: Option<PgPool>,
    pub(crate) members: Arc<dyn MemberDirectory>,
    pub(crate) bus: Arc<dyn FanoutBus>,
    pub(crate) presence: Arc<PresenceTracker>,
    pub(crate) messages: MessageStore,
    pub(crate) pagination: PaginationEngine,
    pub(crate) resolver: ThreadResolver,
    pub(crate) rooms: RoomService,
    pub(crate) push: PushService,
    pub(crate) media: MediaService,
    pub(crate) events: EventDispatcher,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("profile", &self.config.profile)
            .field("pool", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires every service over the given backends.
    pub fn new(config: Arc<Config>, backends: Backends) -> Self {
        let Backends {
            threads,
            members,
            bus,
            push_provider,
            media_storage,
            pool,
        } = backends;

        let messages = MessageStore::new(threads.clone(), members.clone());
        let pagination = PaginationEngine::new(threads.clone(), messages.hydrator().clone());
        let resolver = ThreadResolver::new(threads.clone(), messages.clone());
        let rooms = RoomService::new(threads, members.clone(), messages.clone());
        let push = PushService::new(members.clone(), push_provider);
        let media = MediaService::new(media_storage, config.media.max_bytes);
        let presence = Arc::new(PresenceTracker::new());
        let events = EventDispatcher::new(
            bus.clone(),
            config.push.enabled.then(|| push.clone()),
            presence.clone(),
            config.push.skip_when_online,
        );

        Self {
            config,
            pool,
            members,
            bus,
            presence,
            messages,
            pagination,
            resolver,
            rooms,
            push,
            media,
            events,
        }
    }

    /// State over [`Backends::in_memory`].
    ///
    /// # Errors
    /// Returns [`PushError`] if the push HTTP client cannot be built.
    pub fn in_memory(config: Arc<Config>) -> Result<Self, PushError> {
        let backends = Backends::in_memory(&config)?;
        Ok(Self::new(config, backends))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Waits until every scheduled push delivery has finished.
    pub async fn drain_background(&self) {
        self.events.wait_idle().await;
    }
}
