pub mod events;
pub mod member;
pub mod page;
pub mod push;
pub mod requests;
pub mod thread;

pub use events::{
    MessageCreatedEvent, RoomDeletedEvent, RoomMembershipEvent, ThreadCreatedEvent, Topic,
};
pub use member::{AuthorRef, MemberProfile};
pub use page::{MessagePage, page_counters};
pub use push::{PushSubscription, SubscribeOutcome};
pub use requests::{
    CreateRoomRequest, PageQuery, PageResponse, PostMessageRequest, SendDirectMessageRequest,
};
pub use thread::{
    Media, Message, MessageView, NewThread, Thread, ThreadKind, ThreadView, pair_key,
};
