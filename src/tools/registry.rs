//! Tool registry and dispatcher
//!
//! The registry is initialized once at startup and read-only thereafter.
//! Dispatch enforces the per-tool wall-clock timeout and guarantees that no
//! tool error propagates past it: failures of any kind come back as a
//! `ToolResult` with the appropriate error code.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::llm::ToolSchema;

use super::traits::{ErrorCode, Tool, ToolFailure, ToolMeta, ToolResult};

/// Registry of available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
        }
    }

    /// Register a tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        info!("Registering tool: {}", tool.name());
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Get a tool by name
    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List registered tools
    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.values().cloned().collect()
    }

    /// List tool names, sorted for stable prompt rosters
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get tool count
    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Export every tool in the LLM function-calling format
    pub fn export_llm_schema(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.to_schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Invoke a tool by name, enforcing its timeout.
    ///
    /// Never returns an error: unknown tools, timeouts, and tool-level
    /// failures all come back as `ok=false` envelopes.
    pub async fn invoke(&self, name: &str, args: Value) -> ToolResult {
        let started = Instant::now();

        let Some(tool) = self.find(name) else {
            warn!("Dispatch to unknown tool: {}", name);
            return ToolResult::failure(
                ToolFailure::new(ErrorCode::NotFound, format!("Unknown tool: {}", name)),
                ToolMeta::new(name, 0, args),
            );
        };

        let timeout = tool.timeout();
        debug!("Dispatching tool {} (timeout {:?})", name, timeout);

        match tokio::time::timeout(timeout, tool.invoke(args.clone())).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("Tool {} returned an error: {}", name, e);
                let latency_ms = started.elapsed().as_millis() as u64;
                ToolResult::failure(error_to_failure(e), ToolMeta::new(name, latency_ms, args))
            }
            Err(_) => {
                warn!("Tool {} timed out after {:?}", name, timeout);
                let latency_ms = started.elapsed().as_millis() as u64;
                ToolResult::failure(
                    ToolFailure::new(
                        ErrorCode::Internal,
                        format!("Tool timed out after {}s", timeout.as_secs()),
                    )
                    .retryable(true),
                    ToolMeta::new(name, latency_ms, args),
                )
            }
        }
    }
}

/// Translate a crate error escaping a tool into a failure envelope
fn error_to_failure(e: Error) -> ToolFailure {
    match e {
        Error::InvalidInput(msg) => ToolFailure::new(ErrorCode::InvalidInput, msg),
        Error::NotFound(msg) => ToolFailure::new(ErrorCode::NotFound, msg),
        Error::Http(e) => ToolFailure::new(ErrorCode::Network, e.to_string()),
        Error::Timeout(msg) => ToolFailure::new(ErrorCode::Internal, msg).retryable(true),
        other => ToolFailure::new(ErrorCode::Internal, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps past its own timeout"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(20)
        }
        async fn invoke(&self, args: Value) -> Result<ToolResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::success(
                json!({}),
                ToolMeta::new("slow", 0, args),
            ))
        }
    }

    struct PanickyArgsTool;

    #[async_trait]
    impl Tool for PanickyArgsTool {
        fn name(&self) -> &str {
            "strict"
        }
        fn description(&self) -> &str {
            "rejects missing arguments"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"x": {"type": "string"}}, "required": ["x"]})
        }
        async fn invoke(&self, _args: Value) -> Result<ToolResult> {
            Err(Error::InvalidInput("Missing 'x' parameter".to_string()))
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let result = registry.invoke("nope", json!({})).await;
        assert!(!result.ok);
        assert_eq!(result.error.unwrap().code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_timeout_becomes_retryable_internal() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);

        let result = registry.invoke("slow", json!({})).await;
        assert!(!result.ok);
        let failure = result.error.unwrap();
        assert_eq!(failure.code, ErrorCode::Internal);
        assert!(failure.retryable);
    }

    #[tokio::test]
    async fn test_tool_error_becomes_envelope() {
        let mut registry = ToolRegistry::new();
        registry.register(PanickyArgsTool);

        let result = registry.invoke("strict", json!({})).await;
        assert!(!result.ok);
        assert!(result.is_consistent());
        let failure = result.error.unwrap();
        assert_eq!(failure.code, ErrorCode::InvalidInput);
        assert!(!failure.retryable);
    }

    #[tokio::test]
    async fn test_export_schema_is_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        registry.register(PanickyArgsTool);

        let schemas = registry.export_llm_schema();
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["slow", "strict"]);
    }
}
