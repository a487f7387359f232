/// Messaging services: stores, resolvers, delivery and event dispatch
pub mod errors;
pub mod events;
pub mod hydrate;
pub mod media_service;
pub mod message_store;
pub mod pagination;
pub mod presence;
pub mod push_provider;
pub mod push_service;
pub mod room_service;
pub mod thread_resolver;

pub use errors::{MessagingError, MessagingResult};
pub use events::{DomainEvent, EventDispatcher};
pub use media_service::{LocalMediaStorage, MediaService, MediaStorage};
pub use message_store::MessageStore;
pub use pagination::{PageOutcome, PaginationEngine};
pub use presence::PresenceTracker;
pub use push_provider::{HttpPushProvider, PushProvider};
pub use push_service::PushService;
pub use room_service::RoomService;
pub use thread_resolver::{Resolution, ThreadResolver};
