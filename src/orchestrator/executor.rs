//! Execution stage - runs plan steps in dependency order
//!
//! Scheduling is a topological walk over `depends_on`; within a ready set,
//! steps run in id order. There is no intra-plan parallelism: a step may
//! only start after every predecessor's artifact is written, because inputs
//! freely reference earlier outputs through `{{...}}` and interpolation must
//! see final values.

use std::collections::HashSet;
use std::sync::Arc;

use chrono_tz::Tz;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StageConfig;
use crate::events::EventSender;
use crate::llm::{LlmProvider, LlmRequest, Message};
use crate::telemetry::{Stage, Telemetry, TelemetryCtx, TelemetryEvent};
use crate::tools::{is_relative_token, normalize_date, ErrorCode, ToolRegistry, ToolResult};

use super::state::ExecutionState;
use super::types::{AskExpects, AskUserPending, Plan, PlanStep, StepKind};

/// What one ACT phase consumed
#[derive(Debug, Default)]
pub struct ActOutcome {
    /// Tool calls dispatched (counts only `tool_call` steps)
    pub tool_calls_made: u32,
}

/// Executor for plan steps
pub struct Executor {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    telemetry: Arc<Telemetry>,
    stage: StageConfig,
    timezone: Tz,
}

impl Executor {
    /// Create a new executor
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        telemetry: Arc<Telemetry>,
        stage: StageConfig,
        timezone: Tz,
    ) -> Self {
        Executor {
            provider,
            tools,
            telemetry,
            stage,
            timezone,
        }
    }

    /// Execute the plan's remaining steps, stopping at suspension or budget
    pub async fn execute(
        &self,
        plan: &Plan,
        state: &mut ExecutionState,
        max_tool_calls: u32,
        events: &EventSender,
        ctx: &TelemetryCtx,
    ) -> ActOutcome {
        let mut outcome = ActOutcome::default();
        let order = execution_order(&plan.steps, &state.completed_steps);

        info!(
            "Executing plan: {} steps pending, budget {} tool calls",
            order.len(),
            max_tool_calls
        );

        for index in order {
            // Suspension contract: a pending question halts execution
            if state.ask_user_pending.is_some() {
                break;
            }

            let step = &plan.steps[index];
            if state.completed_steps.contains(&step.id) {
                continue;
            }

            events
                .status(format!("Running step {} ({:?})", step.id, step.kind))
                .await;

            match step.kind {
                StepKind::ToolCall => {
                    let stop = self
                        .run_tool_call(step, state, max_tool_calls, &mut outcome, events, ctx)
                        .await;
                    if stop {
                        break;
                    }
                }
                StepKind::WebSearch => {
                    self.dispatch_into_state(step, "web_search", state, events, ctx)
                        .await;
                }
                StepKind::WriteFile => {
                    self.dispatch_into_state(step, "file_write", state, events, ctx)
                        .await;
                }
                StepKind::Summarize => {
                    self.run_summarize(step, state).await;
                }
                StepKind::AskUser => {
                    self.run_ask_user(step, state);
                    break;
                }
            }
        }

        outcome
    }

    /// Run a tool_call step; returns true when the ACT phase must stop
    async fn run_tool_call(
        &self,
        step: &PlanStep,
        state: &mut ExecutionState,
        max_tool_calls: u32,
        outcome: &mut ActOutcome,
        events: &EventSender,
        ctx: &TelemetryCtx,
    ) -> bool {
        // Validation guarantees the name is present for tool_call steps
        let Some(tool_name) = step.tool.as_deref() else {
            state.record_error(&step.id, "tool_call step without a tool name");
            return false;
        };

        let args = self.prepare_args(tool_name, step, state);

        // The Executor's one piece of tool-aware policy: a weather call
        // without a usable location becomes a question, not a dispatch.
        if tool_name == "weather_get" && location_missing(&args) {
            let question = "Which city should I check the weather for?".to_string();
            state.asked_questions.push(question.clone());
            state.ask_user_pending = Some(AskUserPending {
                ask_id: Uuid::new_v4().to_string(),
                questions: vec![question],
                expects: AskExpects::City,
                step_id: step.id.clone(),
                output_key: step.output_key.clone(),
                context: step.expect.clone(),
            });
            info!("Step {}: weather call suspended on missing location", step.id);
            return true;
        }

        // Budget: stop before the next would-be dispatch
        if outcome.tool_calls_made >= max_tool_calls {
            info!("Per-act tool budget reached before step {}", step.id);
            return true;
        }

        let attempts = u32::from(step.retry) + 1;
        let mut result: Option<ToolResult> = None;
        for attempt in 1..=attempts {
            if outcome.tool_calls_made >= max_tool_calls {
                break;
            }
            outcome.tool_calls_made += 1;

            let r = self
                .tools
                .invoke(tool_name, Value::Object(args.clone()))
                .await;
            events.tool_trace(tool_name, "invoke", r.brief()).await;

            let retry_worthwhile = !r.ok && r.is_retryable() && attempt < attempts;
            result = Some(r);
            if !retry_worthwhile {
                break;
            }
            warn!("Step {}: retrying {} after retryable failure", step.id, tool_name);
        }

        let Some(result) = result else {
            return true;
        };

        if !result.ok {
            let failure = result.error.clone();
            let message = failure
                .as_ref()
                .map(|f| f.message.clone())
                .unwrap_or_else(|| "unknown tool failure".to_string());
            state.record_error(&step.id, format!("{} failed: {}", tool_name, message));

            let event = match failure.as_ref().map(|f| f.code) {
                Some(ErrorCode::InvalidInput) => TelemetryEvent::ExecParamInvalid,
                _ => TelemetryEvent::ExecToolFail,
            };
            self.telemetry.emit(
                Stage::Act,
                event,
                ctx,
                json!({"tool": tool_name, "step_id": step.id, "error": failure}),
            );
        }

        // The envelope (success or failure) is the step's artifact; dependents
        // and the Judge see failures textually through interpolation.
        match serde_json::to_value(&result) {
            Ok(value) => {
                state.set_artifact(&step.output_key, value);
                state.completed_steps.insert(step.id.clone());
            }
            Err(e) => state.record_error(&step.id, format!("unstorable result: {}", e)),
        }

        false
    }

    /// Dispatch a non-tool_call step kind through a fixed registry tool.
    /// These dispatches do not count against the tool-call budget.
    async fn dispatch_into_state(
        &self,
        step: &PlanStep,
        tool_name: &str,
        state: &mut ExecutionState,
        events: &EventSender,
        ctx: &TelemetryCtx,
    ) {
        let args = self.prepare_args(tool_name, step, state);
        let result = self
            .tools
            .invoke(tool_name, Value::Object(args.clone()))
            .await;
        events.tool_trace(tool_name, "invoke", result.brief()).await;

        if !result.ok {
            let failure = result.error.clone();
            let message = failure
                .as_ref()
                .map(|f| f.message.clone())
                .unwrap_or_else(|| "unknown tool failure".to_string());
            state.record_error(&step.id, format!("{} failed: {}", tool_name, message));

            if tool_name == "file_write"
                && failure.as_ref().map(|f| f.code) == Some(ErrorCode::PermissionDenied)
            {
                self.telemetry.emit(
                    Stage::Act,
                    TelemetryEvent::WriteOutOfSandbox,
                    ctx,
                    json!({
                        "step_id": step.id,
                        "path": args.get("path").cloned().unwrap_or(Value::Null),
                        "error": message,
                    }),
                );
            } else {
                self.telemetry.emit(
                    Stage::Act,
                    TelemetryEvent::ExecToolFail,
                    ctx,
                    json!({"tool": tool_name, "step_id": step.id, "error": failure}),
                );
            }
        }

        match serde_json::to_value(&result) {
            Ok(value) => {
                state.set_artifact(&step.output_key, value);
                state.completed_steps.insert(step.id.clone());
            }
            Err(e) => state.record_error(&step.id, format!("unstorable result: {}", e)),
        }
    }

    /// Summarize step: LLM call over the interpolated inputs
    async fn run_summarize(&self, step: &PlanStep, state: &mut ExecutionState) {
        let inputs = state.interpolate_value(&Value::Object(step.inputs.clone()));
        let inputs = inputs.as_object().cloned().unwrap_or_default();

        let text = ["data", "text", "content"]
            .iter()
            .find_map(|key| inputs.get(*key).and_then(|v| v.as_str()).map(String::from))
            .unwrap_or_else(|| {
                inputs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, super::state::render_value(v)))
                    .collect::<Vec<_>>()
                    .join("\n")
            });

        let request = LlmRequest::new(vec![
            Message::system("You are a precise assistant. Summarize or answer concisely."),
            Message::user(format!("Summarize the following content:\n\n{}", text)),
        ])
        .model(&self.stage.executor_model)
        .temperature(self.stage.executor_temperature)
        .max_tokens(self.stage.max_tokens_per_stage.min(512));

        match self.provider.generate(request).await {
            Ok(response) => {
                state.set_artifact(&step.output_key, json!(response.content.trim()));
                state.completed_steps.insert(step.id.clone());
            }
            Err(e) => {
                warn!("Step {}: summarize failed: {}", step.id, e);
                state.record_error(&step.id, format!("summarize failed: {}", e));
            }
        }
    }

    /// AskUser step: synthesize the suspension marker; the step is NOT
    /// marked complete so a resumed replan can revisit it
    fn run_ask_user(&self, step: &PlanStep, state: &mut ExecutionState) {
        let inputs = state.interpolate_value(&Value::Object(step.inputs.clone()));
        let question = inputs
            .get("question")
            .and_then(|v| v.as_str())
            .unwrap_or("Could you share a bit more detail?")
            .to_string();
        let expects = inputs
            .get("expects")
            .and_then(|v| v.as_str())
            .and_then(|s| serde_json::from_value(json!(s)).ok())
            .unwrap_or_else(|| AskExpects::infer(&question));
        let context = inputs
            .get("context")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        state.asked_questions.push(question.clone());
        state.ask_user_pending = Some(AskUserPending {
            ask_id: Uuid::new_v4().to_string(),
            questions: vec![question],
            expects,
            step_id: step.id.clone(),
            output_key: step.output_key.clone(),
            context,
        });
    }

    /// Interpolate step inputs and apply the parameter-coercion pass
    fn prepare_args(
        &self,
        tool_name: &str,
        step: &PlanStep,
        state: &ExecutionState,
    ) -> Map<String, Value> {
        let interpolated = state.interpolate_value(&Value::Object(step.inputs.clone()));
        let args = interpolated.as_object().cloned().unwrap_or_default();
        normalize_params(tool_name, args, self.timezone)
    }
}

/// Parameter normalization: alias translation plus relative-date rewriting.
/// Idempotent; a normalized argument set passes through unchanged.
pub fn normalize_params(tool_name: &str, mut args: Map<String, Value>, tz: Tz) -> Map<String, Value> {
    for (from, to) in alias_pairs(tool_name) {
        if !args.contains_key(*to) {
            if let Some(value) = args.remove(*from) {
                args.insert((*to).to_string(), value);
            }
        }
    }

    for (_key, value) in args.iter_mut() {
        if let Value::String(s) = value {
            if is_relative_token(s) {
                if let Some(normalized) = normalize_date(s, tz) {
                    *value = Value::String(normalized);
                }
            }
        }
    }

    args
}

/// Argument aliases commonly produced by planners, per tool
fn alias_pairs(tool_name: &str) -> &'static [(&'static str, &'static str)] {
    match tool_name {
        "weather_get" => &[("city", "location"), ("place", "location")],
        "file_write" | "file_read" => &[("file_path", "path"), ("filename", "path")],
        "math_calc" => &[("query", "expression")],
        _ => &[],
    }
}

/// A location is unusable when absent, empty, or still an unresolved
/// placeholder
fn location_missing(args: &Map<String, Value>) -> bool {
    match args.get("location").and_then(|v| v.as_str()) {
        None => true,
        Some(s) => s.trim().is_empty() || s.contains("{{"),
    }
}

/// Topological order over the plan's steps, seeded with already-completed
/// ones; ready steps run in id order
fn execution_order(steps: &[PlanStep], completed: &HashSet<String>) -> Vec<usize> {
    let mut done: HashSet<&str> = completed.iter().map(|s| s.as_str()).collect();
    let mut remaining: Vec<usize> = (0..steps.len())
        .filter(|&i| !completed.contains(&steps[i].id))
        .collect();
    let mut order = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let mut ready: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| {
                steps[i]
                    .depends_on
                    .iter()
                    .all(|dep| done.contains(dep.as_str()))
            })
            .collect();

        if ready.is_empty() {
            // Unsatisfiable dependencies; append the rest in declared order
            warn!("Plan has steps with unsatisfiable dependencies");
            order.extend(remaining.drain(..));
            break;
        }

        ready.sort_by(|&a, &b| steps[a].id.cmp(&steps[b].id));
        for i in &ready {
            done.insert(steps[*i].id.as_str());
            order.push(*i);
        }
        remaining.retain(|i| !ready.contains(i));
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> PlanStep {
        PlanStep {
            id: id.to_string(),
            kind: StepKind::ToolCall,
            tool: Some("time_now".to_string()),
            inputs: Map::new(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            expect: String::new(),
            output_key: format!("out_{}", id),
            retry: 0,
        }
    }

    #[test]
    fn test_execution_order_respects_deps_and_id_order() {
        let steps = vec![step("s3", &["s1"]), step("s1", &[]), step("s2", &[])];
        let order = execution_order(&steps, &HashSet::new());
        let ids: Vec<&str> = order.iter().map(|&i| steps[i].id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn test_execution_order_skips_completed() {
        let steps = vec![step("s1", &[]), step("s2", &["s1"])];
        let completed: HashSet<String> = ["s1".to_string()].into_iter().collect();
        let order = execution_order(&steps, &completed);
        let ids: Vec<&str> = order.iter().map(|&i| steps[i].id.as_str()).collect();
        assert_eq!(ids, vec!["s2"]);
    }

    #[test]
    fn test_normalize_params_alias_and_date() {
        let mut args = Map::new();
        args.insert("city".to_string(), json!("Rotterdam"));
        args.insert("date".to_string(), json!("tomorrow"));

        let normalized = normalize_params("weather_get", args, chrono_tz::UTC);
        assert_eq!(normalized.get("location"), Some(&json!("Rotterdam")));
        assert!(normalized.get("city").is_none());
        // tomorrow became YYYY-MM-DD
        let date = normalized["date"].as_str().unwrap();
        assert_eq!(date.len(), 10);
        assert!(date.contains('-'));

        // Second pass is a no-op
        let again = normalize_params("weather_get", normalized.clone(), chrono_tz::UTC);
        assert_eq!(again, normalized);
    }

    #[test]
    fn test_alias_does_not_clobber_existing_key() {
        let mut args = Map::new();
        args.insert("city".to_string(), json!("Paris"));
        args.insert("location".to_string(), json!("London"));
        let normalized = normalize_params("weather_get", args, chrono_tz::UTC);
        assert_eq!(normalized.get("location"), Some(&json!("London")));
    }

    #[test]
    fn test_location_missing() {
        let mut args = Map::new();
        assert!(location_missing(&args));
        args.insert("location".to_string(), json!(""));
        assert!(location_missing(&args));
        args.insert("location".to_string(), json!("{{user_city}}"));
        assert!(location_missing(&args));
        args.insert("location".to_string(), json!("Rotterdam"));
        assert!(!location_missing(&args));
    }
}
