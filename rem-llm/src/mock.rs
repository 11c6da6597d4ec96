//! Mock providers for tests
//!
//! Deterministic stand-ins used across the workspace: a scripted chat
//! provider that replays canned event sequences and an embedding provider
//! that derives stable vectors from content hashes.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;
use rem_core::{RemError, RemResult};
use sha2::{Digest, Sha256};

use crate::{
    ChatEvent, ChatProvider, ChatRequest, ChatStream, EmbeddingProvider, FinishReason,
};

// ============================================================================
// SCRIPTED CHAT
// ============================================================================

/// Chat provider that replays pre-recorded event scripts, one per call.
///
/// Each `stream_chat` pops the next script. Calling past the last script
/// yields a provider error, which makes missing expectations loud in tests.
pub struct ScriptedChatProvider {
    scripts: Mutex<VecDeque<Vec<ChatEvent>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChatProvider {
    pub fn new(scripts: Vec<Vec<ChatEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script a single plain-text reply, streamed in word-sized deltas.
    pub fn reply_with(text: &str) -> Self {
        Self::new(vec![Self::text_script(text)])
    }

    /// Build a script that streams `text` then stops.
    pub fn text_script(text: &str) -> Vec<ChatEvent> {
        let mut events: Vec<ChatEvent> = text
            .split_inclusive(' ')
            .map(|word| ChatEvent::ContentDelta(word.to_string()))
            .collect();
        events.push(ChatEvent::Done {
            finish_reason: FinishReason::Stop,
        });
        events
    }

    /// Requests seen so far, for assertions.
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChatProvider {
    async fn stream_chat(&self, request: ChatRequest) -> RemResult<ChatStream> {
        self.requests.lock().expect("mock lock").push(request);
        let script = self
            .scripts
            .lock()
            .expect("mock lock")
            .pop_front()
            .ok_or_else(|| RemError::provider("mock", "no script left"))?;
        Ok(Box::pin(stream::iter(script.into_iter().map(Ok))))
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// HASH EMBEDDINGS
// ============================================================================

/// Embedding provider producing deterministic unit vectors from content
/// hashes. Equal inputs embed identically; unrelated inputs are nearly
/// orthogonal in expectation.
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dimensions);
        let mut counter = 0u32;
        while vector.len() < self.dimensions {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            for byte in hasher.finalize() {
                if vector.len() == self.dimensions {
                    break;
                }
                vector.push((byte as f32 - 127.5) / 127.5);
            }
            counter += 1;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> RemResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_id(&self) -> &str {
        "hash-embed-v1"
    }
}
