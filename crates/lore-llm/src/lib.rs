//! Completion and embedding backends.

pub mod any;
pub mod error;
mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
mod sse;

pub use any::AnyProvider;
pub use error::LlmError;
pub use provider::{ChatStream, EmbeddingProvider, LlmProvider, Message, Role};
