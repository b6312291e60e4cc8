//! Planning stage - turns a user query into a validated plan
//!
//! The Planner calls the LLM with a strict-JSON contract: any schema
//! deviation triggers one revalidation retry, then a fallback to a minimal
//! single-step summarize plan. Replans fold the previous verdict's missing
//! items into the prompt.

use std::collections::HashMap;
use std::sync::Arc;

use chrono_tz::Tz;
use serde_json::json;
use tracing::{info, warn};

use crate::config::StageConfig;
use crate::llm::{extract_json_object, LlmProvider, LlmRequest, Message};
use crate::telemetry::{Stage, Telemetry, TelemetryCtx, TelemetryEvent};
use crate::tools::ToolRegistry;

use super::state::ExecutionState;
use super::types::{JudgeVerdict, Plan, PlanStep, StepKind};

/// Planner for generating execution plans
pub struct Planner {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    telemetry: Arc<Telemetry>,
    stage: StageConfig,
    strict_json: bool,
    timezone: Tz,
}

impl Planner {
    /// Create a new planner
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        telemetry: Arc<Telemetry>,
        stage: StageConfig,
        strict_json: bool,
        timezone: Tz,
    ) -> Self {
        Planner {
            provider,
            tools,
            telemetry,
            stage,
            strict_json,
            timezone,
        }
    }

    /// Produce a plan for the query, falling back to a minimal plan when the
    /// LLM cannot deliver valid JSON
    pub async fn plan(
        &self,
        user_query: &str,
        state: &ExecutionState,
        judge_history: &[JudgeVerdict],
        ctx: &TelemetryCtx,
    ) -> Plan {
        let system = self.system_prompt();
        let user = self.user_prompt(user_query, &state.inputs, judge_history);

        for attempt in 1..=2u32 {
            let mut request = LlmRequest::new(vec![
                Message::system(&system),
                Message::user(&user),
            ])
            .model(&self.stage.planner_model)
            .temperature(self.stage.planner_temperature)
            .max_tokens(self.stage.max_tokens_per_stage);
            if self.strict_json {
                request = request.force_json();
            }

            let response = match self.provider.generate(request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Planner LLM call failed (attempt {}): {}", attempt, e);
                    continue;
                }
            };

            match parse_plan(&response.content) {
                Ok(plan) if plan.steps.is_empty() => {
                    warn!("Planner returned a plan with zero steps");
                    self.telemetry.emit(
                        Stage::Plan,
                        TelemetryEvent::PlanEmptyOrUseless,
                        ctx,
                        json!({"attempt": attempt}),
                    );
                    return fallback_plan(user_query);
                }
                Ok(plan) => match plan.validate() {
                    Ok(()) => {
                        info!("Plan accepted: {} steps", plan.steps.len());
                        return plan;
                    }
                    Err(e) => {
                        warn!("Plan failed validation (attempt {}): {}", attempt, e);
                        self.telemetry.emit(
                            Stage::Plan,
                            TelemetryEvent::PlannerNonJson,
                            ctx,
                            json!({
                                "attempt": attempt,
                                "error": e.to_string(),
                                "raw_excerpt": excerpt(&response.content),
                            }),
                        );
                    }
                },
                Err(e) => {
                    warn!("Plan response was not valid JSON (attempt {}): {}", attempt, e);
                    self.telemetry.emit(
                        Stage::Plan,
                        TelemetryEvent::PlannerNonJson,
                        ctx,
                        json!({
                            "attempt": attempt,
                            "error": e,
                            "raw_excerpt": excerpt(&response.content),
                        }),
                    );
                }
            }
        }

        warn!("Planner fell back to the minimal plan");
        fallback_plan(user_query)
    }

    fn system_prompt(&self) -> String {
        let mut roster = String::new();
        for schema in self.tools.export_llm_schema() {
            let params: Vec<String> = schema
                .parameters
                .get("properties")
                .and_then(|p| p.as_object())
                .map(|props| props.keys().cloned().collect())
                .unwrap_or_default();
            roster.push_str(&format!(
                "- {}: {} (params: {})\n",
                schema.name,
                schema.description,
                if params.is_empty() {
                    "none".to_string()
                } else {
                    params.join(", ")
                }
            ));
        }

        format!(
            "You are the planning stage of a task engine. Break the user's request into a \
             bounded plan of concrete steps.\n\n\
             Available tools:\n{roster}\n\
             Hard rules:\n\
             1. For any query involving current or relative dates, the FIRST step calls \
                time_now (timezone: {tz}).\n\
             2. ask_user is reserved for subjective information (city, preferences, budget). \
                Never ask the user for dates or times.\n\
             3. A plan contains at most one ask_user step and at most two web_search steps.\n\
             4. A plan that produces a file must use a write_file step whose content input \
                references the output_key of an earlier synthesis step via {{{{...}}}}.\n\
             5. At most 6 steps. Every step states its expected evidence in `expect`.\n\n\
             Step types: tool_call, summarize, write_file, ask_user, web_search.\n\
             Output ONLY a JSON object matching the requested format, with no commentary.",
            roster = roster,
            tz = self.timezone.name(),
        )
    }

    fn user_prompt(
        &self,
        user_query: &str,
        inputs: &HashMap<String, String>,
        judge_history: &[JudgeVerdict],
    ) -> String {
        let mut parts = vec![format!("User query: {}", user_query)];

        if !inputs.is_empty() {
            let mut keys: Vec<&String> = inputs.keys().collect();
            keys.sort();
            let known: Vec<String> = keys.iter().map(|k| format!("{}={}", k, inputs[*k])).collect();
            parts.push(format!(
                "Known user inputs (already answered, do NOT ask again): {}",
                known.join(", ")
            ));
        }

        if let Some(last) = judge_history.last() {
            if !last.missing.is_empty() {
                parts.push(format!(
                    "A previous attempt was judged incomplete. Missing: {}",
                    last.missing.join("; ")
                ));
            }
        }

        parts.push(
            r#"Respond with JSON in exactly this shape:
{
  "goal": "short goal description",
  "success_criteria": ["criterion 1", "criterion 2"],
  "max_steps": 6,
  "steps": [
    {
      "id": "s1",
      "type": "tool_call",
      "tool": "time_now",
      "inputs": {},
      "depends_on": [],
      "expect": "the expected evidence",
      "output_key": "current_time",
      "retry": 1
    }
  ],
  "final_answer_template": "template with {{output_key}} placeholders"
}
Output JSON only."#
                .to_string(),
        );

        parts.join("\n\n")
    }
}

/// Parse a plan from raw LLM output, tolerating surrounding noise
fn parse_plan(content: &str) -> std::result::Result<Plan, String> {
    if let Ok(plan) = serde_json::from_str::<Plan>(content.trim()) {
        return Ok(plan);
    }
    let candidate =
        extract_json_object(content).ok_or_else(|| "no JSON object in response".to_string())?;
    serde_json::from_str::<Plan>(candidate).map_err(|e| e.to_string())
}

/// Minimal single-step plan used when planning fails outright
fn fallback_plan(user_query: &str) -> Plan {
    let mut inputs = serde_json::Map::new();
    inputs.insert("text".to_string(), json!(user_query));

    Plan {
        goal: format!("Answer the user's request: {}", user_query),
        success_criteria: vec!["A reasonable answer is produced".to_string()],
        max_steps: 2,
        steps: vec![PlanStep {
            id: "s1".to_string(),
            kind: StepKind::Summarize,
            tool: None,
            inputs,
            depends_on: vec![],
            expect: "An answer grounded in the query itself".to_string(),
            output_key: "analysis".to_string(),
            retry: 0,
        }],
        final_answer_template: "{{analysis}}".to_string(),
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(300).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_with_markdown_fence() {
        let content = "```json\n{\"goal\": \"g\", \"max_steps\": 2, \"steps\": [{\"id\": \"s1\", \
                       \"type\": \"summarize\", \"inputs\": {}, \"output_key\": \"a\"}], \
                       \"final_answer_template\": \"{{a}}\"}\n```";
        let plan = parse_plan(content).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].kind, StepKind::Summarize);
    }

    #[test]
    fn test_parse_plan_rejects_prose() {
        assert!(parse_plan("I will first check the time.").is_err());
    }

    #[test]
    fn test_fallback_plan_is_valid() {
        let plan = fallback_plan("what is the meaning of life");
        assert!(plan.validate().is_ok());
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.final_answer_template, "{{analysis}}");
    }
}
