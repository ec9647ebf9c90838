pub mod app;
pub mod chat_stream;
pub mod client;
pub mod config;
pub mod constants;
pub mod conversation;
pub mod credential;
pub mod message;
pub mod sse;
