//! Sandboxed file-write tool
//!
//! Writes are permitted only under the configured sandbox directory.
//! Absolute paths, `..` components, and anything escaping the sandbox are
//! rejected with `PERMISSION_DENIED`; the Executor reports those rejections
//! to telemetry as sandbox violations.

use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::traits::{str_arg, ErrorCode, Tool, ToolFailure, ToolMeta, ToolResult};
use crate::error::Result;

/// Content cap for a single write
const MAX_CONTENT_BYTES: usize = 10 * 1024 * 1024;

/// Resolve a user-supplied path against the sandbox.
///
/// Accepts relative paths and `~/`-prefixed paths (normalized into the
/// sandbox). Rejects absolute paths and any `..` component.
pub(crate) fn resolve_sandbox_path(
    sandbox: &Path,
    raw: &str,
) -> std::result::Result<PathBuf, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("Empty path".to_string());
    }

    let relative = trimmed.strip_prefix("~/").unwrap_or(trimmed);
    let candidate = Path::new(relative);

    if candidate.is_absolute() {
        return Err(format!("Absolute paths are not allowed: {}", trimmed));
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(format!("Path may not contain '..': {}", trimmed));
    }

    let resolved = sandbox.join(candidate);
    if !resolved.starts_with(sandbox) {
        return Err(format!("Path escapes the sandbox: {}", trimmed));
    }
    Ok(resolved)
}

/// Built-in tool: write a file inside the sandbox
pub struct FileWriteTool {
    sandbox_dir: PathBuf,
}

impl FileWriteTool {
    pub fn new(sandbox_dir: PathBuf) -> Self {
        FileWriteTool { sandbox_dir }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file inside the sandbox directory"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the sandbox, e.g. 'reports/weather.md'"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                },
                "format": {
                    "type": "string",
                    "enum": ["md", "txt", "json"],
                    "description": "Extension appended when the path has none"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult> {
        let started = Instant::now();
        let meta = |started: &Instant, args: Value| {
            ToolMeta::new("file_write", started.elapsed().as_millis() as u64, args)
        };

        // `filename` is a common planner alias for `path`
        let Some(raw_path) = str_arg(&args, "path").or_else(|| str_arg(&args, "filename")) else {
            return Ok(ToolResult::failure(
                ToolFailure::new(ErrorCode::InvalidInput, "Missing 'path' parameter"),
                meta(&started, args),
            ));
        };
        let Some(content) = str_arg(&args, "content") else {
            return Ok(ToolResult::failure(
                ToolFailure::new(ErrorCode::InvalidInput, "Missing 'content' parameter"),
                meta(&started, args),
            ));
        };

        if content.len() > MAX_CONTENT_BYTES {
            return Ok(ToolResult::failure(
                ToolFailure::new(ErrorCode::InvalidInput, "Content exceeds the 10 MB limit"),
                meta(&started, args),
            ));
        }

        let mut raw_path = raw_path;
        if let Some(format) = str_arg(&args, "format") {
            if !raw_path.to_lowercase().ends_with(&format!(".{}", format.to_lowercase())) {
                raw_path = format!("{}.{}", raw_path, format);
            }
        }

        let resolved = match resolve_sandbox_path(&self.sandbox_dir, &raw_path) {
            Ok(p) => p,
            Err(msg) => {
                return Ok(ToolResult::failure(
                    ToolFailure::new(ErrorCode::PermissionDenied, msg),
                    meta(&started, args),
                ));
            }
        };

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::failure(
                    ToolFailure::new(
                        ErrorCode::Internal,
                        format!("Failed to create directories: {}", e),
                    )
                    .retryable(true),
                    meta(&started, args),
                ));
            }
        }

        match tokio::fs::write(&resolved, &content).await {
            Ok(()) => Ok(ToolResult::success(
                json!({
                    "path_abs": resolved.to_string_lossy(),
                    "bytes_written": content.len(),
                }),
                meta(&started, args),
            )),
            Err(e) => Ok(ToolResult::failure(
                ToolFailure::new(ErrorCode::Internal, format!("Failed to write file: {}", e))
                    .retryable(true),
                meta(&started, args),
            )),
        }
    }
}
