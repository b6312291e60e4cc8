//! Judging stage - decides whether execution satisfied the plan
//!
//! The Judge reconstructs the goal, success criteria, completion ratio,
//! bounded artifact excerpts, the error log, and the roster of questions
//! already asked, then demands a strict-JSON verdict. One retry on schema
//! failure, then a conservative fallback.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::config::StageConfig;
use crate::llm::{extract_json_object, LlmProvider, LlmRequest, Message};
use crate::telemetry::{Stage, Telemetry, TelemetryCtx, TelemetryEvent};

use super::state::ExecutionState;
use super::types::{JudgeVerdict, Plan};

/// Judge for evaluating execution results
pub struct Judge {
    provider: Arc<dyn LlmProvider>,
    telemetry: Arc<Telemetry>,
    stage: StageConfig,
    strict_json: bool,
}

impl Judge {
    /// Create a new judge
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        telemetry: Arc<Telemetry>,
        stage: StageConfig,
        strict_json: bool,
    ) -> Self {
        Judge {
            provider,
            telemetry,
            stage,
            strict_json,
        }
    }

    /// Evaluate whether the execution state satisfies the plan
    pub async fn evaluate(
        &self,
        plan: &Plan,
        state: &ExecutionState,
        iteration: u32,
        ctx: &TelemetryCtx,
    ) -> JudgeVerdict {
        let system = SYSTEM_PROMPT.to_string();
        let user = self.user_prompt(plan, state, iteration);

        let mut verdict = None;
        for attempt in 1..=2u32 {
            let mut request = LlmRequest::new(vec![
                Message::system(&system),
                Message::user(&user),
            ])
            .model(&self.stage.judge_model)
            .temperature(self.stage.judge_temperature)
            .max_tokens(self.stage.max_tokens_per_stage);
            if self.strict_json {
                request = request.force_json();
            }

            let response = match self.provider.generate(request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Judge LLM call failed (attempt {}): {}", attempt, e);
                    continue;
                }
            };

            match parse_verdict(&response.content) {
                Ok(v) => {
                    verdict = Some(v);
                    break;
                }
                Err(e) => {
                    warn!("Judge response invalid (attempt {}): {}", attempt, e);
                }
            }
        }

        let verdict = verdict.unwrap_or_else(|| {
            warn!("Judge fell back to the conservative verdict");
            JudgeVerdict::fallback()
        });

        info!(
            "Judge verdict: satisfied={}, missing={}, questions={}",
            verdict.satisfied,
            verdict.missing.len(),
            verdict.questions.len()
        );

        if !verdict.satisfied {
            self.telemetry.emit_full(
                Stage::Judge,
                TelemetryEvent::SpecMismatch,
                ctx,
                json!({
                    "iteration": iteration,
                    "missing": verdict.missing,
                    "questions": verdict.questions,
                }),
                json!({"goal": plan.goal, "criteria": plan.success_criteria}),
                state.artifact_excerpts(200),
            );
        }

        verdict
    }

    fn user_prompt(&self, plan: &Plan, state: &ExecutionState, iteration: u32) -> String {
        let mut parts = vec![format!("Goal: {}", plan.goal), String::new()];

        parts.push("Success criteria:".to_string());
        for (i, criterion) in plan.success_criteria.iter().enumerate() {
            parts.push(format!("{}. {}", i + 1, criterion));
        }

        parts.push(format!(
            "\nCompleted steps: {}/{}",
            state.completed_steps.len(),
            plan.steps.len()
        ));

        parts.push("\nArtifacts:".to_string());
        if let Some(excerpts) = state.artifact_excerpts(200).as_object() {
            if excerpts.is_empty() {
                parts.push("(none)".to_string());
            }
            for (key, value) in excerpts {
                parts.push(format!("- {}: {}", key, value.as_str().unwrap_or("")));
            }
        }

        if !state.errors.is_empty() {
            parts.push("\nExecution errors:".to_string());
            for error in &state.errors {
                parts.push(format!("- {}: {}", error.step_id, error.message));
            }
        }

        if !state.asked_questions.is_empty() {
            parts.push("\nQuestions already asked (do NOT repeat these):".to_string());
            for q in &state.asked_questions {
                parts.push(format!("- {}", q));
            }
        }

        parts.push(format!("\nThis is iteration {}.", iteration));
        parts.push(
            r#"
Respond with JSON in exactly this shape:
{
  "satisfied": true,
  "missing": ["absent evidence"],
  "plan_patch": null,
  "questions": ["at most two clarifying questions"]
}
Output JSON only."#
                .to_string(),
        );

        parts.join("\n")
    }
}

const SYSTEM_PROMPT: &str = "\
You are the quality-evaluation stage of a task engine. Decide whether the \
executed artifacts satisfy the success criteria.

Rules:
- Judge on evidence in the artifacts, not on intentions.
- Never repeat a question that was already asked.
- When evidence is partial, prefer a plan_patch over questions.
- Ask at most two questions, and only for subjective information the user \
alone can provide.
- When satisfied is false, name what is missing or ask a question.";

/// Parse a verdict from raw LLM output, tolerating surrounding noise
fn parse_verdict(content: &str) -> std::result::Result<JudgeVerdict, String> {
    let mut verdict = serde_json::from_str::<JudgeVerdict>(content.trim())
        .or_else(|_| {
            extract_json_object(content)
                .ok_or_else(|| "no JSON object in response".to_string())
                .and_then(|c| serde_json::from_str::<JudgeVerdict>(c).map_err(|e| e.to_string()))
        })?;

    // Cap rather than reject over-long question lists
    verdict.questions.truncate(2);
    verdict.validate().map_err(|e| e.to_string())?;
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict_with_noise() {
        let content = "Verdict follows. {\"satisfied\": false, \"missing\": [\"no city\"], \
                       \"questions\": [\"Which city?\"]} That is all.";
        let verdict = parse_verdict(content).unwrap();
        assert!(!verdict.satisfied);
        assert_eq!(verdict.questions, vec!["Which city?".to_string()]);
    }

    #[test]
    fn test_parse_verdict_truncates_questions() {
        let content = r#"{"satisfied": false, "missing": ["x"],
                          "questions": ["q1", "q2", "q3"]}"#;
        let verdict = parse_verdict(content).unwrap();
        assert_eq!(verdict.questions.len(), 2);
    }

    #[test]
    fn test_parse_verdict_rejects_empty_unsatisfied() {
        let content = r#"{"satisfied": false}"#;
        assert!(parse_verdict(content).is_err());
    }
}
