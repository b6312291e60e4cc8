//! Current-time tool

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::{json, Value};

use super::traits::{Tool, ToolMeta, ToolResult};
use crate::error::Result;

/// Built-in tool: current time in the configured timezone
pub struct TimeNowTool {
    timezone: Tz,
}

impl TimeNowTool {
    pub fn new(timezone: Tz) -> Self {
        TimeNowTool { timezone }
    }
}

#[async_trait]
impl Tool for TimeNowTool {
    fn name(&self) -> &str {
        "time_now"
    }

    fn description(&self) -> &str {
        "Get the current time: ISO timestamp, local date, weekday, and time of day"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(3)
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult> {
        let started = Instant::now();
        let now = Utc::now().with_timezone(&self.timezone);

        let time_of_day = match now.format("%H").to_string().parse::<u32>().unwrap_or(0) {
            5..=11 => "morning",
            12..=17 => "afternoon",
            18..=21 => "evening",
            _ => "night",
        };

        let data = json!({
            "current_time": now.format("%H:%M:%S").to_string(),
            "local_time": now.format("%Y-%m-%d %H:%M:%S %Z").to_string(),
            "iso_time": now.to_rfc3339(),
            "date": now.format("%Y-%m-%d").to_string(),
            "weekday": now.format("%A").to_string(),
            "time_of_day": time_of_day,
            "timezone": self.timezone.name(),
        });

        Ok(ToolResult::success(
            data,
            ToolMeta::new(self.name(), started.elapsed().as_millis() as u64, args),
        ))
    }
}
