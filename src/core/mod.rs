pub mod chat_stream;
pub mod config;
pub mod constants;
pub mod conversation;
pub mod error;
pub mod frame;
pub mod line_decoder;
pub mod message;
