//! REM LLM - Provider Abstraction Layer
//!
//! Provider-agnostic async traits for chat and embeddings:
//! - `ChatProvider` streams typed events (content deltas, tool calls, done)
//! - `EmbeddingProvider` batches texts into vectors
//! - Model identifiers use the `provider:model` format throughout
//! - Retries with exponential backoff wrap every provider RPC
//!
//! The OpenAI-compatible HTTP adapters live here; everything above this
//! crate talks to the traits only.

mod chat;
mod embedding;
mod model;
pub mod mock;
mod openai;
mod retry;

pub use chat::*;
pub use embedding::*;
pub use model::*;
pub use openai::{OpenAiChatProvider, OpenAiConfig, OpenAiEmbeddingProvider};
pub use retry::*;
