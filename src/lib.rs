//! azchat is a terminal chat client that streams answers from an Azure OpenAI
//! chat deployment.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the streaming engine: byte-to-line decoding, SSE frame
//!   interpretation, the per-request [`core::chat_stream::StreamSession`],
//!   and the in-memory [`core::conversation::ConversationStore`].
//! - [`api`] defines the chat completions request and response payloads.
//! - [`cli`] parses arguments and implements the settings commands.
//! - [`ui`] runs the interactive line-oriented chat loop.
//! - [`utils`] holds URL construction and logging setup.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod ui;
pub mod utils;
