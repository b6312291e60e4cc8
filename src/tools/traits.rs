//! Core tool trait and the uniform result envelope
//!
//! Every tool invocation returns a `ToolResult`: a tagged success/failure
//! envelope with call metadata. Exactly one of `data`/`error` is populated,
//! consistently with `ok`. Tools never let an error escape as a panic or a
//! raw `Err` past the dispatcher.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::llm::ToolSchema;

/// Error codes in the tool failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Network,
    NotFound,
    InvalidInput,
    RateLimit,
    PermissionDenied,
    Internal,
}

impl ErrorCode {
    /// Default retry policy per code: transport-class failures retry,
    /// caller-fault failures do not
    pub fn default_retryable(&self) -> bool {
        matches!(self, ErrorCode::Network | ErrorCode::RateLimit)
    }
}

/// A tool failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFailure {
    /// Failure class
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Whether retrying the same call may succeed
    pub retryable: bool,
}

impl ToolFailure {
    /// Create a failure with the code's default retry policy
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ToolFailure {
            code,
            message: message.into(),
            retryable: code.default_retryable(),
        }
    }

    /// Override the retry flag
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// Metadata attached to every tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMeta {
    /// Tool name
    pub source: String,
    /// Wall-clock latency of the invocation
    pub latency_ms: u64,
    /// The invocation arguments
    pub params: Value,
}

impl ToolMeta {
    /// Build metadata for a call
    pub fn new(source: impl Into<String>, latency_ms: u64, params: Value) -> Self {
        ToolMeta {
            source: source.into(),
            latency_ms,
            params,
        }
    }
}

/// Uniform envelope returned by every tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the invocation succeeded
    pub ok: bool,
    /// Tool-defined structured value when ok
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure details when not ok
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
    /// Call metadata
    pub meta: ToolMeta,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(data: Value, meta: ToolMeta) -> Self {
        ToolResult {
            ok: true,
            data: Some(data),
            error: None,
            meta,
        }
    }

    /// Create a failed result
    pub fn failure(error: ToolFailure, meta: ToolMeta) -> Self {
        ToolResult {
            ok: false,
            data: None,
            error: Some(error),
            meta,
        }
    }

    /// Whether the failure is worth retrying
    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().map(|e| e.retryable).unwrap_or(false)
    }

    /// Envelope consistency: exactly one of data/error, matching `ok`
    pub fn is_consistent(&self) -> bool {
        if self.ok {
            self.data.is_some() && self.error.is_none()
        } else {
            self.data.is_none() && self.error.is_some()
        }
    }

    /// Short rendering for tool-panel traces
    pub fn brief(&self) -> String {
        if self.ok {
            let rendered = self
                .data
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_default();
            let excerpt: String = rendered.chars().take(200).collect();
            excerpt
        } else {
            let failure = self.error.as_ref();
            format!(
                "error: {}",
                failure.map(|e| e.message.as_str()).unwrap_or("unknown")
            )
        }
    }
}

/// A tool that can be invoked by the Executor and advertised to the Planner
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the unique tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Get the JSON Schema for tool parameters
    fn parameters_schema(&self) -> Value;

    /// Per-tool wall-clock timeout enforced by the dispatcher
    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    /// Invoke the tool with the given arguments
    async fn invoke(&self, args: Value) -> Result<ToolResult>;

    /// Convert to the LLM function-calling schema
    fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Extract a required string argument
pub(crate) fn str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_consistency() {
        let meta = ToolMeta::new("demo", 3, json!({}));
        let ok = ToolResult::success(json!({"x": 1}), meta.clone());
        assert!(ok.is_consistent());

        let failed = ToolResult::failure(
            ToolFailure::new(ErrorCode::NotFound, "missing"),
            meta.clone(),
        );
        assert!(failed.is_consistent());
        assert!(!failed.is_retryable());

        let inconsistent = ToolResult {
            ok: true,
            data: None,
            error: None,
            meta,
        };
        assert!(!inconsistent.is_consistent());
    }

    #[test]
    fn test_default_retry_policy() {
        assert!(ErrorCode::Network.default_retryable());
        assert!(ErrorCode::RateLimit.default_retryable());
        assert!(!ErrorCode::InvalidInput.default_retryable());
        assert!(!ErrorCode::PermissionDenied.default_retryable());
        assert!(!ErrorCode::NotFound.default_retryable());
        assert!(!ErrorCode::Internal.default_retryable());
    }

    #[test]
    fn test_failure_serializes_code() {
        let failure = ToolFailure::new(ErrorCode::PermissionDenied, "outside sandbox");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["code"], "PERMISSION_DENIED");
        assert_eq!(json["retryable"], false);
    }
}
