pub mod admin;
pub mod conversations;
pub mod messages;
pub mod users;
pub mod websocket;
