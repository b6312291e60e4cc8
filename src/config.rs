//! Configuration management for Taskweave
//!
//! All configuration comes from environment variables (optionally via a
//! `.env` file), with sensible defaults for every key. API keys are held
//! behind `SecretString` so they never appear in debug output.

use std::path::PathBuf;

use chrono_tz::Tz;
use secrecy::SecretString;

use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// LLM transport configuration
    pub llm: LlmConfig,
    /// Per-stage model assignment and sampling
    pub stages: StageConfig,
    /// Orchestration budgets
    pub budgets: BudgetConfig,
    /// Sandbox directory for file-producing tools
    pub desktop_dir: PathBuf,
    /// Timezone used for date normalization
    pub timezone: Tz,
    /// Whether tools are registered at all
    pub tools_enabled: bool,
    /// Whether the RAG store is wired in (accepted, unused by the core)
    pub rag_enabled: bool,
    /// Whether incoming queries go through the orchestrator
    pub use_orchestrator: bool,
    /// Whether the provider's forced-JSON mode is requested
    pub strict_json_mode: bool,
    /// Path of the JSONL telemetry sink
    pub telemetry_path: PathBuf,
}

/// LLM provider transport configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API key
    pub api_key: SecretString,
    /// Base URL of an OpenAI-compatible chat completions API
    pub base_url: String,
    /// Default model when no per-stage override applies
    pub default_model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Per-stage model assignment
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Model used by the Planner
    pub planner_model: String,
    /// Planner sampling temperature (cool)
    pub planner_temperature: f32,
    /// Model used by the Judge
    pub judge_model: String,
    /// Judge sampling temperature (cool)
    pub judge_temperature: f32,
    /// Model used by the Executor (summaries, file content)
    pub executor_model: String,
    /// Executor sampling temperature (cooler)
    pub executor_temperature: f32,
    /// Token cap applied to every stage call
    pub max_tokens_per_stage: u32,
}

/// Orchestration budget dimensions
#[derive(Debug, Clone, Copy)]
pub struct BudgetConfig {
    /// Tool calls allowed within one ACT phase
    pub max_tool_calls_per_act: u32,
    /// Tool calls allowed across the whole orchestration
    pub max_total_tool_calls: u32,
    /// Planning rounds allowed (initial plan plus replans)
    pub max_plan_iters: u32,
    /// Wall-clock budget for one orchestration slice, in milliseconds
    pub max_latency_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        BudgetConfig {
            max_tool_calls_per_act: 3,
            max_total_tool_calls: 6,
            max_plan_iters: 2,
            max_latency_ms: 20_000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let default_model = env_or("LLM_MODEL", "deepseek-chat");

        let llm = LlmConfig {
            api_key: SecretString::from(env_or("LLM_API_KEY", "")),
            base_url: env_or("LLM_BASE_URL", "https://api.deepseek.com/v1"),
            default_model: default_model.clone(),
            timeout_secs: env_parse("LLM_TIMEOUT_SECS", 30),
        };

        let stages = StageConfig {
            planner_model: env_or("PLANNER_MODEL", "deepseek-reasoner"),
            planner_temperature: env_parse("PLANNER_TEMPERATURE", 0.2),
            judge_model: env_or("JUDGE_MODEL", "deepseek-reasoner"),
            judge_temperature: env_parse("JUDGE_TEMPERATURE", 0.2),
            executor_model: env_or("EXECUTOR_MODEL", default_model),
            executor_temperature: env_parse("EXECUTOR_TEMPERATURE", 0.1),
            max_tokens_per_stage: env_parse("MAX_TOKENS_PER_STAGE", 4000),
        };

        let budgets = BudgetConfig {
            max_tool_calls_per_act: env_parse("MAX_TOOL_CALLS_PER_ACT", 3),
            max_total_tool_calls: env_parse("MAX_TOTAL_TOOL_CALLS", 6),
            max_plan_iters: env_parse("MAX_PLAN_ITERS", 2),
            max_latency_ms: env_parse("MAX_LATENCY_MS", 20_000),
        };

        let timezone: Tz = env_or("TIMEZONE", "UTC")
            .parse()
            .map_err(|e| Error::Config(format!("Invalid TIMEZONE: {}", e)))?;

        Ok(Config {
            llm,
            stages,
            budgets,
            desktop_dir: resolve_dir(&env_or("DESKTOP_DIR", "~/Desktop/taskweave")),
            timezone,
            tools_enabled: env_flag("TOOLS_ENABLED", true),
            rag_enabled: env_flag("RAG_ENABLED", false),
            use_orchestrator: env_flag("USE_ORCHESTRATOR", true),
            strict_json_mode: env_flag("STRICT_JSON_MODE", true),
            telemetry_path: PathBuf::from(env_or("TELEMETRY_PATH", "./logs/events.jsonl")),
        })
    }

    /// Validate configuration consistency
    pub fn validate(&self, require_api_key: bool) -> Result<()> {
        use secrecy::ExposeSecret;

        let mut errors = Vec::new();

        if require_api_key && self.llm.api_key.expose_secret().is_empty() {
            errors.push("LLM_API_KEY is not set".to_string());
        }
        if self.budgets.max_plan_iters == 0 {
            errors.push("MAX_PLAN_ITERS must be at least 1".to_string());
        }
        if self.budgets.max_total_tool_calls < self.budgets.max_tool_calls_per_act {
            errors.push(format!(
                "MAX_TOTAL_TOOL_CALLS ({}) is below MAX_TOOL_CALLS_PER_ACT ({})",
                self.budgets.max_total_tool_calls, self.budgets.max_tool_calls_per_act
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(errors.join(", ")))
        }
    }
}

/// Read an environment variable with a default
fn env_or(key: &str, default: impl Into<String>) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

/// Read and parse an environment variable, falling back on parse failure
fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Read a boolean flag ("true"/"1" are truthy)
fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| {
            let v = v.to_lowercase();
            v == "true" || v == "1"
        })
        .unwrap_or(default)
}

/// Expand a leading `~` to the user's home directory
fn resolve_dir(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_defaults() {
        let budgets = BudgetConfig::default();
        assert_eq!(budgets.max_tool_calls_per_act, 3);
        assert_eq!(budgets.max_total_tool_calls, 6);
        assert_eq!(budgets.max_plan_iters, 2);
        assert_eq!(budgets.max_latency_ms, 20_000);
    }

    #[test]
    fn test_resolve_dir_plain() {
        assert_eq!(resolve_dir("/tmp/sandbox"), PathBuf::from("/tmp/sandbox"));
    }

    #[test]
    fn test_validate_rejects_inverted_budgets() {
        let mut config = Config {
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
            desktop_dir: PathBuf::from("/tmp"),
            timezone: chrono_tz::UTC,
            tools_enabled: true,
            rag_enabled: false,
            use_orchestrator: true,
            strict_json_mode: true,
            telemetry_path: PathBuf::from("/tmp/events.jsonl"),
        };
        assert!(config.validate(true).is_ok());

        config.budgets.max_total_tool_calls = 1;
        assert!(config.validate(true).is_err());
    }
}
