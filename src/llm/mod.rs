//! LLM layer - provider abstraction and HTTP client
//!
//! The orchestrator's three reasoning stages (Planner, Executor, Judge) talk
//! to an `LlmProvider` trait object. The shipped implementation speaks the
//! OpenAI-compatible chat completions protocol (DeepSeek-style endpoints);
//! tests substitute scripted providers.

mod client;
mod provider;
mod types;

pub use client::OpenAiCompatProvider;
pub use provider::{LlmProvider, LlmStream};
pub use types::{
    FunctionCall, LlmRequest, LlmResponse, Message, Role, StreamChunk, ToolSchema, Usage,
};

/// Extract the first balanced JSON object from free text.
///
/// Used when a provider has no forced-JSON mode, or ignores it: the Planner
/// and Judge run this pass before schema validation. Returns `None` when no
/// balanced object exists. Braces inside string literals are skipped.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_plain() {
        let text = r#"{"a": 1}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn test_extract_json_object_with_noise() {
        let text = "Here is the plan:\n```json\n{\"goal\": \"x\", \"steps\": []}\n```\nDone.";
        assert_eq!(
            extract_json_object(text),
            Some("{\"goal\": \"x\", \"steps\": []}")
        );
    }

    #[test]
    fn test_extract_json_object_nested_and_strings() {
        let text = r#"noise {"a": {"b": "}"}, "c": [1, 2]} trailing"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"a": {"b": "}"}, "c": [1, 2]}"#)
        );
    }

    #[test]
    fn test_extract_json_object_none() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{unterminated"), None);
    }
}
