//! Type definitions for the LLM layer

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing context and instructions
    System,
    /// User message
    User,
    /// Assistant (AI) response
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Tool schema exported to the LLM function-calling API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name
    pub name: String,
    /// Human description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: Value,
}

/// A function call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Provider-assigned call ID
    pub id: String,
    /// Function name
    pub name: String,
    /// Arguments as a JSON object
    pub arguments: Value,
}

/// A request to the LLM provider
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    /// Model override (provider default when `None`)
    pub model: Option<String>,
    /// Conversation messages
    pub messages: Vec<Message>,
    /// Tool schemas for function calling
    pub tools_schema: Option<Vec<ToolSchema>>,
    /// Request the provider's forced-JSON output mode
    pub force_json: bool,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// A plain request from messages
    pub fn new(messages: Vec<Message>) -> Self {
        LlmRequest {
            messages,
            ..Default::default()
        }
    }

    /// Set the model
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Request strict JSON output
    pub fn force_json(mut self) -> Self {
        self.force_json = true;
        self
    }

    /// Set sampling temperature
    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    /// Set the token cap
    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    /// Attach tool schemas
    pub fn tools(mut self, schemas: Vec<ToolSchema>) -> Self {
        self.tools_schema = Some(schemas);
        self
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens in the completion
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens used
    #[serde(default)]
    pub total_tokens: u32,
}

/// A complete response from the provider
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Generated text content
    pub content: String,
    /// Function calls requested by the model
    pub function_calls: Vec<FunctionCall>,
    /// Model that produced the response
    pub model: String,
    /// Token usage, when reported
    pub usage: Option<Usage>,
    /// Round-trip latency in milliseconds
    pub latency_ms: u64,
}

/// One chunk of a streaming response
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// Incremental text content
    pub delta: Option<String>,
    /// Terminal function-call list (only on the final chunk)
    pub function_calls: Option<Vec<FunctionCall>>,
    /// Finish reason (only on the final chunk)
    pub finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
    }

    #[test]
    fn test_request_builder() {
        let req = LlmRequest::new(vec![Message::user("hi")])
            .model("test-model")
            .force_json()
            .temperature(0.2)
            .max_tokens(512);
        assert_eq!(req.model.as_deref(), Some("test-model"));
        assert!(req.force_json);
        assert_eq!(req.temperature, Some(0.2));
        assert_eq!(req.max_tokens, Some(512));
    }
}
