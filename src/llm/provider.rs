//! LLM Provider trait - abstract interface for LLM backends
//!
//! The trait-based approach enables:
//! - Swapping the backing API without touching orchestration code
//! - Testing the full state machine with scripted providers

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;

use super::types::{LlmRequest, LlmResponse, StreamChunk};

/// Stream of LLM response chunks
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Abstract interface for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the default model for this provider
    fn default_model(&self) -> &str;

    /// Generate a complete response
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Generate a streaming response yielding content deltas; the terminal
    /// chunk carries the accumulated function-call list
    async fn generate_stream(&self, request: LlmRequest) -> Result<LlmStream>;
}
