//! Sandboxed file-read tool

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::file_write::resolve_sandbox_path;
use super::traits::{str_arg, ErrorCode, Tool, ToolFailure, ToolMeta, ToolResult};
use crate::error::Result;

/// Built-in tool: read a file from the sandbox
pub struct FileReadTool {
    sandbox_dir: PathBuf,
}

impl FileReadTool {
    pub fn new(sandbox_dir: PathBuf) -> Self {
        FileReadTool { sandbox_dir }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a file from the sandbox directory"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the sandbox"
                }
            },
            "required": ["path"]
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult> {
        let started = Instant::now();
        let meta = |started: &Instant, args: Value| {
            ToolMeta::new("file_read", started.elapsed().as_millis() as u64, args)
        };

        let Some(raw_path) = str_arg(&args, "path").or_else(|| str_arg(&args, "filename")) else {
            return Ok(ToolResult::failure(
                ToolFailure::new(ErrorCode::InvalidInput, "Missing 'path' parameter"),
                meta(&started, args),
            ));
        };

        let resolved = match resolve_sandbox_path(&self.sandbox_dir, &raw_path) {
            Ok(p) => p,
            Err(msg) => {
                return Ok(ToolResult::failure(
                    ToolFailure::new(ErrorCode::PermissionDenied, msg),
                    meta(&started, args),
                ));
            }
        };

        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => Ok(ToolResult::success(
                json!({
                    "path_abs": resolved.to_string_lossy(),
                    "bytes": content.len(),
                    "content": content,
                }),
                meta(&started, args),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ToolResult::failure(
                ToolFailure::new(ErrorCode::NotFound, format!("No such file: {}", raw_path)),
                meta(&started, args),
            )),
            Err(e) => Ok(ToolResult::failure(
                ToolFailure::new(ErrorCode::Internal, format!("Failed to read file: {}", e))
                    .retryable(true),
                meta(&started, args),
            )),
        }
    }
}
