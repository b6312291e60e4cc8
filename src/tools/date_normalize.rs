//! Date normalization tool
//!
//! Converts natural-language dates ("today", "tomorrow", localized
//! equivalents, or an explicit YYYY-MM-DD) into the standard YYYY-MM-DD
//! form in a given timezone. The conversion logic is also used by the
//! Executor's parameter-coercion pass, so it lives in free functions.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};

use super::traits::{str_arg, ErrorCode, Tool, ToolFailure, ToolMeta, ToolResult};
use crate::error::Result;

/// Relative-date tokens recognized by the normalizer (English and Dutch)
const RELATIVE_TOKENS: &[(&str, i64)] = &[
    ("today", 0),
    ("tonight", 0),
    ("vandaag", 0),
    ("tomorrow", 1),
    ("morgen", 1),
    ("day after tomorrow", 2),
    ("overmorgen", 2),
    ("yesterday", -1),
    ("gisteren", -1),
];

/// Whether a string is a relative-date token the coercion pass should rewrite
pub fn is_relative_token(s: &str) -> bool {
    let needle = s.trim().to_lowercase();
    RELATIVE_TOKENS.iter().any(|(token, _)| *token == needle)
}

/// Normalize a date expression to YYYY-MM-DD in the given timezone.
///
/// Already-normalized dates pass through unchanged, which makes the
/// operation idempotent.
pub fn normalize_date(input: &str, timezone: Tz) -> Option<String> {
    let needle = input.trim().to_lowercase();

    if let Some((_, offset)) = RELATIVE_TOKENS.iter().find(|(token, _)| *token == needle) {
        let date = Utc::now().with_timezone(&timezone).date_naive() + ChronoDuration::days(*offset);
        return Some(date.format("%Y-%m-%d").to_string());
    }

    if let Ok(date) = NaiveDate::parse_from_str(needle.trim(), "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }

    None
}

/// Built-in tool: date normalization
pub struct DateNormalizeTool {
    timezone: Tz,
}

impl DateNormalizeTool {
    pub fn new(timezone: Tz) -> Self {
        DateNormalizeTool { timezone }
    }
}

#[async_trait]
impl Tool for DateNormalizeTool {
    fn name(&self) -> &str {
        "date_normalize"
    }

    fn description(&self) -> &str {
        "Convert a natural-language date like 'tomorrow' into YYYY-MM-DD form"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "date": {
                    "type": "string",
                    "description": "Date to normalize, e.g. 'tomorrow' or '2026-03-01'"
                },
                "timezone": {
                    "type": "string",
                    "description": "IANA timezone name; defaults to the configured timezone"
                }
            },
            "required": ["date"]
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult> {
        let started = Instant::now();
        let meta = |started: Instant, args: Value| {
            ToolMeta::new("date_normalize", started.elapsed().as_millis() as u64, args)
        };

        let Some(date) = str_arg(&args, "date") else {
            return Ok(ToolResult::failure(
                ToolFailure::new(ErrorCode::InvalidInput, "Missing 'date' parameter"),
                meta(started, args),
            ));
        };

        let timezone = match str_arg(&args, "timezone") {
            Some(raw) => match raw.parse::<Tz>() {
                Ok(tz) => tz,
                Err(_) => {
                    return Ok(ToolResult::failure(
                        ToolFailure::new(
                            ErrorCode::InvalidInput,
                            format!("Unknown timezone: {}", raw),
                        ),
                        meta(started, args),
                    ));
                }
            },
            None => self.timezone,
        };

        match normalize_date(&date, timezone) {
            Some(normalized) => Ok(ToolResult::success(
                json!({
                    "normalized_date": normalized,
                    "original_input": date,
                    "timezone": timezone.name(),
                }),
                meta(started, args),
            )),
            None => Ok(ToolResult::failure(
                ToolFailure::new(
                    ErrorCode::InvalidInput,
                    format!("Cannot parse date: {}", date),
                ),
                meta(started, args),
            )),
        }
    }
}
