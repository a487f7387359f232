pub mod conversations;
pub mod media;
pub mod members;
pub mod push;
pub mod rooms;
pub mod streaming;
