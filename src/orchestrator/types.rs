//! Plan, verdict, and task types for the orchestrator
//!
//! `PlanStep` is a tagged type: the Executor switches on `kind`, and tool
//! calls carry a tool name resolved against the registry at execution time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Well-known user-input slots that templates may reference
pub const USER_INPUT_KEYS: &[&str] = &["user_city", "user_date", "user_answer"];

/// How long an idle active task survives between slices
const TASK_EXPIRY_SECS: i64 = 3600;

/// Step kinds the Executor can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ToolCall,
    Summarize,
    WriteFile,
    AskUser,
    WebSearch,
}

/// One step of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Step ID, unique within the plan
    pub id: String,
    /// Step kind
    #[serde(rename = "type")]
    pub kind: StepKind,
    /// Tool name (required when kind is `tool_call`)
    #[serde(default)]
    pub tool: Option<String>,
    /// Inputs: literal values or `{{placeholder}}` strings
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// IDs of earlier steps this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// What this step should produce (read by the Judge)
    #[serde(default)]
    pub expect: String,
    /// Artifact key the result is stored under
    pub output_key: String,
    /// Retry count for failed tool calls (0 or 1)
    #[serde(default)]
    pub retry: u8,
}

/// A bounded execution plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Free-text goal
    pub goal: String,
    /// Ordered, testable success criteria
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// Step cap declared by the Planner (1-10)
    pub max_steps: u32,
    /// Ordered steps
    pub steps: Vec<PlanStep>,
    /// Template with `{{output_key}}` placeholders
    pub final_answer_template: String,
}

impl Plan {
    /// Validate the structural invariants of a plan.
    ///
    /// Dependencies may only reference earlier steps, which also rules out
    /// cycles. Template placeholders must resolve to an `output_key` or a
    /// user-input slot.
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.max_steps) {
            return Err(Error::PlanValidation(format!(
                "max_steps must be between 1 and 10, got {}",
                self.max_steps
            )));
        }
        if self.steps.is_empty() {
            return Err(Error::PlanValidation("Plan has no steps".to_string()));
        }
        if self.steps.len() as u32 > self.max_steps {
            return Err(Error::PlanValidation(format!(
                "{} steps exceed max_steps {}",
                self.steps.len(),
                self.max_steps
            )));
        }

        let mut seen: Vec<&str> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            if seen.contains(&step.id.as_str()) {
                return Err(Error::PlanValidation(format!(
                    "Duplicate step id: {}",
                    step.id
                )));
            }
            for dep in &step.depends_on {
                if !seen.contains(&dep.as_str()) {
                    return Err(Error::PlanValidation(format!(
                        "Step {} depends on {}, which is not an earlier step",
                        step.id, dep
                    )));
                }
            }
            if step.kind == StepKind::ToolCall && step.tool.is_none() {
                return Err(Error::PlanValidation(format!(
                    "Step {} is a tool_call without a tool name",
                    step.id
                )));
            }
            if step.retry > 1 {
                return Err(Error::PlanValidation(format!(
                    "Step {} retry must be 0 or 1",
                    step.id
                )));
            }
            if step.output_key.is_empty() {
                return Err(Error::PlanValidation(format!(
                    "Step {} has an empty output_key",
                    step.id
                )));
            }
            seen.push(&step.id);
        }

        let known_keys: Vec<&str> = self
            .steps
            .iter()
            .map(|s| s.output_key.as_str())
            .chain(USER_INPUT_KEYS.iter().copied())
            .collect();
        for key in placeholders(&self.final_answer_template) {
            if !known_keys.contains(&key.as_str()) {
                return Err(Error::PlanValidation(format!(
                    "Template placeholder {{{{{}}}}} matches no output_key or user-input slot",
                    key
                )));
            }
        }

        Ok(())
    }
}

/// Collect `{{key}}` placeholder names from a template
pub(crate) fn placeholders(text: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        keys.push(after[..end].trim().to_string());
        rest = &after[end + 2..];
    }
    keys
}

/// Judge output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeVerdict {
    /// Whether the artifacts satisfy the success criteria
    pub satisfied: bool,
    /// What is absent
    #[serde(default)]
    pub missing: Vec<String>,
    /// Opaque structured diff; carried, never auto-applied
    #[serde(default)]
    pub plan_patch: Option<Value>,
    /// Clarifying questions for the user (at most two)
    #[serde(default)]
    pub questions: Vec<String>,
}

impl JudgeVerdict {
    /// Validate verdict invariants
    pub fn validate(&self) -> Result<()> {
        if self.questions.len() > 2 {
            return Err(Error::VerdictValidation(
                "Verdict carries more than two questions".to_string(),
            ));
        }
        if !self.satisfied && self.missing.is_empty() && self.questions.is_empty() {
            return Err(Error::VerdictValidation(
                "Unsatisfied verdict must name missing items or ask questions".to_string(),
            ));
        }
        Ok(())
    }

    /// Conservative fallback when the Judge output cannot be parsed
    pub fn fallback() -> Self {
        JudgeVerdict {
            satisfied: false,
            missing: vec!["evaluation error".to_string()],
            plan_patch: None,
            questions: vec!["Could you restate your request?".to_string()],
        }
    }
}

/// Expected answer kind of a pending question; drives output-key selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AskExpects {
    City,
    Date,
    Answer,
}

impl AskExpects {
    /// Default artifact key for an answer of this kind
    pub fn default_output_key(&self) -> &'static str {
        match self {
            AskExpects::City => "user_city",
            AskExpects::Date => "user_date",
            AskExpects::Answer => "user_answer",
        }
    }

    /// Infer the expected kind from a question's wording
    pub fn infer(question: &str) -> Self {
        let q = question.to_lowercase();
        if q.contains("city") || q.contains("location") || q.contains("where") {
            AskExpects::City
        } else if q.contains("date") || q.contains("which day") || q.contains("when") {
            AskExpects::Date
        } else {
            AskExpects::Answer
        }
    }
}

/// Suspension marker: execution is paused awaiting a user answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskUserPending {
    /// Unique ask ID, echoed back by the UI on resume
    pub ask_id: String,
    /// Questions to put to the user (the first is rendered)
    pub questions: Vec<String>,
    /// Expected answer kind
    pub expects: AskExpects,
    /// Originating step, empty when the Judge asked
    pub step_id: String,
    /// Artifact key the answer should land under; empty means derive
    /// from `expects`
    pub output_key: String,
    /// Free-text context shown as a hint
    pub context: String,
}

impl AskUserPending {
    /// The question rendered to the user
    pub fn question(&self) -> &str {
        self.questions.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Resolve the artifact key the answer is stored under
    pub fn answer_key(&self) -> String {
        if self.output_key.is_empty() {
            self.expects.default_output_key().to_string()
        } else {
            self.output_key.clone()
        }
    }
}

/// Terminal status of one orchestration slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceStatus {
    Done,
    Failed,
    WaitingForUser,
}

/// Result of one orchestration slice
#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    /// How the slice ended
    pub status: SliceStatus,
    /// Rendered final answer (status `Done`)
    pub final_answer: Option<String>,
    /// Neutral user-visible failure text (status `Failed`)
    pub error_message: Option<String>,
    /// Question awaiting an answer (status `WaitingForUser`)
    pub pending_question: Option<String>,
    /// Ask ID of the pending question
    pub pending_ask_id: Option<String>,
    /// Verdicts collected this slice
    pub judge_history: Vec<JudgeVerdict>,
    /// Planning rounds consumed so far
    pub plan_iterations: u32,
    /// Tool calls consumed so far
    pub total_tool_calls: u32,
    /// Slice wall-clock in milliseconds
    pub total_ms: u64,
}

/// In-flight orchestration state retained between slices of one goal
#[derive(Debug, Clone)]
pub struct ActiveTask {
    /// Task ID
    pub id: String,
    /// The goal being pursued
    pub user_query: String,
    /// Current plan, absent before the first PLAN phase
    pub plan: Option<Plan>,
    /// Execution state owned by this task
    pub state: super::state::ExecutionState,
    /// Planning rounds consumed
    pub plan_iterations: u32,
    /// Tool calls consumed
    pub total_tool_calls: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last slice activity
    pub last_activity: DateTime<Utc>,
}

impl ActiveTask {
    /// Start a task for a user query
    pub fn new(user_query: impl Into<String>) -> Self {
        let now = Utc::now();
        ActiveTask {
            id: Uuid::new_v4().to_string(),
            user_query: user_query.into(),
            plan: None,
            state: super::state::ExecutionState::default(),
            plan_iterations: 0,
            total_tool_calls: 0,
            created_at: now,
            last_activity: now,
        }
    }

    /// Record slice activity
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Whether the task idled past its expiry window
    pub fn is_expired(&self) -> bool {
        Utc::now() - self.last_activity > Duration::seconds(TASK_EXPIRY_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(id: &str, output_key: &str, depends_on: &[&str]) -> PlanStep {
        PlanStep {
            id: id.to_string(),
            kind: StepKind::ToolCall,
            tool: Some("time_now".to_string()),
            inputs: Map::new(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            expect: String::new(),
            output_key: output_key.to_string(),
            retry: 0,
        }
    }

    fn plan(steps: Vec<PlanStep>, template: &str) -> Plan {
        Plan {
            goal: "test".to_string(),
            success_criteria: vec!["done".to_string()],
            max_steps: 6,
            steps,
            final_answer_template: template.to_string(),
        }
    }

    #[test]
    fn test_valid_plan() {
        let p = plan(
            vec![step("s1", "a", &[]), step("s2", "b", &["s1"])],
            "Result: {{b}}",
        );
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_forward_dependency_rejected() {
        let p = plan(vec![step("s1", "a", &["s2"]), step("s2", "b", &[])], "x");
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let p = plan(vec![step("s1", "a", &[])], "Result: {{missing}}");
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_user_input_placeholder_allowed() {
        let p = plan(vec![step("s1", "a", &[])], "For {{user_city}}: {{a}}");
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_step_count_cap() {
        let mut p = plan(vec![step("s1", "a", &[])], "{{a}}");
        p.max_steps = 1;
        p.steps.push(step("s2", "b", &["s1"]));
        assert!(p.validate().is_err());

        p.max_steps = 11;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_tool_call_requires_tool() {
        let mut s = step("s1", "a", &[]);
        s.tool = None;
        assert!(plan(vec![s], "x").validate().is_err());
    }

    #[test]
    fn test_plan_deserializes_from_llm_json() {
        let raw = json!({
            "goal": "tell the time",
            "success_criteria": ["an accurate current time"],
            "max_steps": 3,
            "steps": [{
                "id": "s1",
                "type": "tool_call",
                "tool": "time_now",
                "inputs": {},
                "depends_on": [],
                "expect": "current time info",
                "output_key": "current_time",
                "retry": 1
            }],
            "final_answer_template": "It is {{current_time}}."
        });
        let p: Plan = serde_json::from_value(raw).unwrap();
        assert!(p.validate().is_ok());
        assert_eq!(p.steps[0].kind, StepKind::ToolCall);
    }

    #[test]
    fn test_verdict_invariants() {
        let bad = JudgeVerdict {
            satisfied: false,
            missing: vec![],
            plan_patch: None,
            questions: vec![],
        };
        assert!(bad.validate().is_err());

        let fallback = JudgeVerdict::fallback();
        assert!(fallback.validate().is_ok());
        assert!(!fallback.satisfied);
    }

    #[test]
    fn test_expects_inference() {
        assert_eq!(
            AskExpects::infer("Which city are you in?"),
            AskExpects::City
        );
        assert_eq!(AskExpects::infer("For when is the report?"), AskExpects::Date);
        assert_eq!(AskExpects::infer("What budget do you have?"), AskExpects::Answer);
    }

    #[test]
    fn test_placeholders_helper() {
        assert_eq!(
            placeholders("a {{x}} b {{ y }} c"),
            vec!["x".to_string(), "y".to_string()]
        );
        assert!(placeholders("no keys").is_empty());
    }
}
