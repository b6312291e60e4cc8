//! Smart-vs-simple pre-router
//!
//! A lightweight keyword heuristic that short-circuits queries which clearly
//! need no planning (greetings, chit-chat) straight to a one-shot LLM call.
//! Prefix flags override the heuristic; ambiguous queries default to the
//! orchestrator, which treats every call uniformly either way.

use tracing::debug;

/// Where a query should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    /// One-shot chat completion
    Chat,
    /// Full plan/act/judge orchestration
    Orchestrate,
}

/// Routing outcome
#[derive(Debug, Clone)]
pub struct RouteDecision {
    /// Chosen mode
    pub mode: RouteMode,
    /// Why, for the debug panel
    pub reason: String,
    /// Query with any prefix flag stripped
    pub clean_query: String,
}

const CHAT_PREFIXES: &[&str] = &["/chat", "!chat"];
const ORCHESTRATE_PREFIXES: &[&str] = &["/plan", "/orchestrate", "!plan"];

const ORCHESTRATE_KEYWORDS: &[&str] = &[
    // temporal
    "time", "date", "today", "tomorrow", "yesterday", "when",
    // weather
    "weather", "rain", "temperature", "forecast",
    // files and reports
    "write", "save", "export", "file", "report", "note",
    // tools
    "search", "find", "calculate", "sum", "calendar", "schedule", "meeting",
    "email", "mail",
    // multi-step phrasing
    "then", "first", "finally", "plan", "organize",
];

const CHAT_KEYWORDS: &[&str] = &[
    "hello", "hi ", "hey", "thanks", "thank you", "who are you", "your name",
    "how are you", "good morning", "good evening",
];

/// Keyword/prefix query router
#[derive(Debug, Default)]
pub struct QueryRouter;

impl QueryRouter {
    pub fn new() -> Self {
        QueryRouter
    }

    /// Classify a query
    pub fn route(&self, query: &str) -> RouteDecision {
        let trimmed = query.trim();
        let lower = trimmed.to_lowercase();

        if trimmed.is_empty() {
            return RouteDecision {
                mode: RouteMode::Chat,
                reason: "empty query".to_string(),
                clean_query: String::new(),
            };
        }

        for prefix in CHAT_PREFIXES {
            if lower.starts_with(prefix) {
                return RouteDecision {
                    mode: RouteMode::Chat,
                    reason: format!("forced by {} prefix", prefix),
                    clean_query: trimmed[prefix.len()..].trim().to_string(),
                };
            }
        }
        for prefix in ORCHESTRATE_PREFIXES {
            if lower.starts_with(prefix) {
                return RouteDecision {
                    mode: RouteMode::Orchestrate,
                    reason: format!("forced by {} prefix", prefix),
                    clean_query: trimmed[prefix.len()..].trim().to_string(),
                };
            }
        }

        let orchestrate_hits = ORCHESTRATE_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .count();
        let chat_hits = CHAT_KEYWORDS.iter().filter(|k| lower.contains(*k)).count();

        // Arithmetic goes to the orchestrator: math_calc evaluates exactly
        let has_arithmetic = lower.chars().any(|c| c.is_ascii_digit())
            && lower.chars().any(|c| "+-*/^".contains(c));

        let decision = if has_arithmetic {
            RouteDecision {
                mode: RouteMode::Orchestrate,
                reason: "arithmetic expression".to_string(),
                clean_query: trimmed.to_string(),
            }
        } else if orchestrate_hits > chat_hits {
            RouteDecision {
                mode: RouteMode::Orchestrate,
                reason: format!("{} orchestration keywords", orchestrate_hits),
                clean_query: trimmed.to_string(),
            }
        } else if orchestrate_hits == 0 && chat_hits > 0 {
            RouteDecision {
                mode: RouteMode::Chat,
                reason: format!("{} chat keywords", chat_hits),
                clean_query: trimmed.to_string(),
            }
        } else if trimmed.len() < 20 {
            RouteDecision {
                mode: RouteMode::Chat,
                reason: "short query without orchestration keywords".to_string(),
                clean_query: trimmed.to_string(),
            }
        } else {
            // Grey zone: orchestrate, the safe default
            RouteDecision {
                mode: RouteMode::Orchestrate,
                reason: "ambiguous query, defaulting to orchestration".to_string(),
                clean_query: trimmed.to_string(),
            }
        };

        debug!("Routed query as {:?}: {}", decision.mode, decision.reason);
        decision
    }
}
