//! Parley is a terminal chat client that streams replies from an
//! OpenRouter-compatible chat completion API.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation transcript, the credential store, the
//!   event-stream decoder and the streaming controller that ties them to the
//!   network.
//! - [`api`] defines the request/response payloads exchanged with the API.
//! - [`cli`] parses arguments and runs the line-oriented front end, which only
//!   consumes transcript updates and produces user intents.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
