//! Calendar and email demo tools
//!
//! Deterministic local-data tools so multi-tool plans can exercise the
//! dispatcher without external accounts wired up.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use super::traits::{str_arg, Tool, ToolMeta, ToolResult};
use crate::error::Result;

/// Built-in tool: read calendar entries
pub struct CalendarReadTool;

#[async_trait]
impl Tool for CalendarReadTool {
    fn name(&self) -> &str {
        "calendar_read"
    }

    fn description(&self) -> &str {
        "Read calendar entries for a date (YYYY-MM-DD, defaults to today)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "date": {
                    "type": "string",
                    "description": "Date to read, as YYYY-MM-DD"
                }
            },
            "required": []
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult> {
        let started = Instant::now();
        let date = str_arg(&args, "date")
            .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());

        let data = json!({
            "date": date,
            "events": [
                {"time": "09:30", "title": "Team standup", "location": "Room 2"},
                {"time": "14:00", "title": "Design review", "location": "Video call"},
            ],
        });

        Ok(ToolResult::success(
            data,
            ToolMeta::new(self.name(), started.elapsed().as_millis() as u64, args),
        ))
    }
}

/// Built-in tool: list recent emails
pub struct EmailListTool;

#[async_trait]
impl Tool for EmailListTool {
    fn name(&self) -> &str {
        "email_list"
    }

    fn description(&self) -> &str {
        "List recent emails (subject, sender, received time)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of messages (default 10)"
                }
            },
            "required": []
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult> {
        let started = Instant::now();
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(10) as usize;

        let messages = vec![
            json!({"from": "facilities@example.com", "subject": "Parking garage closed Friday", "received": "08:12"}),
            json!({"from": "no-reply@calendar.example.com", "subject": "Reminder: design review", "received": "07:45"}),
            json!({"from": "newsletter@example.org", "subject": "Weekly digest", "received": "06:30"}),
        ];

        let data = json!({
            "count": messages.len().min(limit),
            "messages": messages.into_iter().take(limit).collect::<Vec<_>>(),
        });

        Ok(ToolResult::success(
            data,
            ToolMeta::new(self.name(), started.elapsed().as_millis() as u64, args),
        ))
    }
}
