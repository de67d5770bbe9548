pub mod chat;
pub mod conversation;
pub mod events;
pub mod messages;
pub mod models;
pub mod normalize;
pub mod prompt;
pub mod quota;
pub mod records;
pub mod store;
pub mod submissions;
pub mod tasks;
