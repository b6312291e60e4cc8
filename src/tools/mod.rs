//! Tools module - uniform tool contract, registry, and built-in tools
//!
//! Each tool is a self-contained module implementing the `Tool` trait. Tools
//! are registered into a `ToolRegistry` once at startup; the registry is
//! read-only afterwards and shared across orchestration slices.
//!
//! ## Built-in Tools
//!
//! - **time_now**: current time in the configured timezone
//! - **date_normalize**: natural-language date to YYYY-MM-DD
//! - **weather_get**: Open-Meteo weather lookup
//! - **math_calc**: safe arithmetic evaluation
//! - **file_write** / **file_read**: sandboxed file access
//! - **web_search**: DuckDuckGo search (no API key required)
//! - **calendar_read** / **email_list**: deterministic demo data
//!
//! ## Adding a New Tool
//!
//! 1. Create a new file in `src/tools/` (e.g., `my_tool.rs`)
//! 2. Implement the `Tool` trait
//! 3. Add `mod my_tool;` and `pub use` in this file
//! 4. Register it in `builtin_registry`

mod calendar;
mod date_normalize;
mod file_read;
mod file_write;
mod math_calc;
mod registry;
mod time_now;
mod traits;
mod weather;
mod web_search;

// Core trait and envelope types
pub use traits::{ErrorCode, Tool, ToolFailure, ToolMeta, ToolResult};

// Registry
pub use registry::ToolRegistry;

// Built-in tools
pub use calendar::{CalendarReadTool, EmailListTool};
pub use date_normalize::{is_relative_token, normalize_date, DateNormalizeTool};
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use math_calc::MathCalcTool;
pub use time_now::TimeNowTool;
pub use weather::WeatherTool;
pub use web_search::WebSearchTool;

use crate::config::Config;

/// Build the standard registry from configuration
pub fn builtin_registry(config: &Config) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    if !config.tools_enabled {
        return registry;
    }

    registry.register(TimeNowTool::new(config.timezone));
    registry.register(DateNormalizeTool::new(config.timezone));
    registry.register(WeatherTool::new());
    registry.register(MathCalcTool);
    registry.register(FileWriteTool::new(config.desktop_dir.clone()));
    registry.register(FileReadTool::new(config.desktop_dir.clone()));
    registry.register(WebSearchTool::new());
    registry.register(CalendarReadTool);
    registry.register(EmailListTool);

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BudgetConfig, LlmConfig, StageConfig};
    use secrecy::SecretString;
    use std::path::PathBuf;

    fn test_config(tools_enabled: bool) -> Config {
        Config {
            llm: LlmConfig {
                api_key: SecretString::from("k".to_string()),
                base_url: "https://example.com/v1".into(),
                default_model: "m".into(),
                timeout_secs: 30,
            },
            stages: StageConfig {
                planner_model: "m".into(),
                planner_temperature: 0.2,
                judge_model: "m".into(),
                judge_temperature: 0.2,
                executor_model: "m".into(),
                executor_temperature: 0.1,
                max_tokens_per_stage: 4000,
            },
            budgets: BudgetConfig::default(),
            desktop_dir: PathBuf::from("/tmp/taskweave-test"),
            timezone: chrono_tz::UTC,
            tools_enabled,
            rag_enabled: false,
            use_orchestrator: true,
            strict_json_mode: true,
            telemetry_path: PathBuf::from("/tmp/taskweave-test/events.jsonl"),
        }
    }

    #[test]
    fn test_builtin_registry_contents() {
        let registry = builtin_registry(&test_config(true));
        assert_eq!(registry.count(), 9);
        assert!(registry.find("time_now").is_some());
        assert!(registry.find("weather_get").is_some());
        assert!(registry.find("file_write").is_some());
    }

    #[test]
    fn test_tools_disabled_yields_empty_registry() {
        let registry = builtin_registry(&test_config(false));
        assert_eq!(registry.count(), 0);
    }
}
