//! PLAN -> ACT -> JUDGE state machine
//!
//! Drives the three reasoning stages, enforces the budget dimensions, and
//! handles ASK_USER suspension. A slice ends in `DONE`, `FAILED`, or
//! `WAITING_FOR_USER`; a suspended orchestration is resumed only by a
//! subsequent user message, which forces a replan with enriched inputs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::events::EventSender;
use crate::llm::LlmProvider;
use crate::telemetry::{Stage, Telemetry, TelemetryCtx, TelemetryEvent};
use crate::tools::ToolRegistry;

use super::executor::Executor;
use super::judge::Judge;
use super::planner::Planner;
use super::types::{
    ActiveTask, AskExpects, AskUserPending, JudgeVerdict, OrchestrationResult, SliceStatus,
};

/// The machine's phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Plan,
    Act,
    Judge,
    AskUser,
    Done,
}

/// Orchestrator state machine
pub struct Orchestrator {
    planner: Planner,
    executor: Executor,
    judge: Judge,
    telemetry: Arc<Telemetry>,
    budgets: crate::config::BudgetConfig,
    stages: crate::config::StageConfig,
}

impl Orchestrator {
    /// Wire the orchestrator from its explicit dependencies
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        telemetry: Arc<Telemetry>,
        config: &Config,
    ) -> Self {
        let planner = Planner::new(
            provider.clone(),
            tools.clone(),
            telemetry.clone(),
            config.stages.clone(),
            config.strict_json_mode,
            config.timezone,
        );
        let executor = Executor::new(
            provider.clone(),
            tools.clone(),
            telemetry.clone(),
            config.stages.clone(),
            config.timezone,
        );
        let judge = Judge::new(
            provider,
            telemetry.clone(),
            config.stages.clone(),
            config.strict_json_mode,
        );

        Orchestrator {
            planner,
            executor,
            judge,
            telemetry,
            budgets: config.budgets,
            stages: config.stages.clone(),
        }
    }

    /// Feed a user answer into a suspended task and re-enter the machine.
    ///
    /// The answer lands under the output_key carried by the suspension
    /// marker (falling back to the key its `expects` dictates), the marker
    /// is cleared, and the machine re-enters at PLAN: the revised plan may
    /// legitimately drop or reorder steps given the new information.
    pub async fn resume(
        &self,
        task: &mut ActiveTask,
        answer: &str,
        session_id: &str,
        events: &EventSender,
    ) -> OrchestrationResult {
        if let Some(pending) = task.state.ask_user_pending.take() {
            let key = pending.answer_key();
            info!("Resuming task {} with answer under '{}'", task.id, key);
            task.state.set_artifact(&key, json!(answer));
            task.state
                .inputs
                .insert(key.clone(), answer.to_string());
            // Also fill the canonical slot so prompts and templates can rely on it
            task.state
                .inputs
                .entry(pending.expects.default_output_key().to_string())
                .or_insert_with(|| answer.to_string());
        }

        self.run_slice(task, session_id, events).await
    }

    /// Run one orchestration slice to a terminal state
    pub async fn run_slice(
        &self,
        task: &mut ActiveTask,
        session_id: &str,
        events: &EventSender,
    ) -> OrchestrationResult {
        let started = Instant::now();
        let deadline = Duration::from_millis(self.budgets.max_latency_ms);
        task.touch();

        let mut ctx = TelemetryCtx::new(session_id, &task.id, &task.user_query);
        ctx.limits = json!({
            "max_tool_calls_per_act": self.budgets.max_tool_calls_per_act,
            "max_total_tool_calls": self.budgets.max_total_tool_calls,
            "max_plan_iters": self.budgets.max_plan_iters,
            "max_latency_ms": self.budgets.max_latency_ms,
        });
        ctx.model = json!({
            "planner": self.stages.planner_model,
            "executor": self.stages.executor_model,
            "judge": self.stages.judge_model,
        });
        if let Some(plan) = &task.plan {
            ctx.plan_json = serde_json::to_string(plan).unwrap_or_default();
        }

        let mut judge_history: Vec<JudgeVerdict> = Vec::new();
        let mut phase = Phase::Plan;

        let result = loop {
            if started.elapsed() > deadline {
                warn!("Slice exceeded its wall-clock budget");
                self.telemetry.emit(
                    Stage::Act,
                    TelemetryEvent::BudgetExceeded,
                    &ctx,
                    json!({
                        "reason": "max_latency_ms",
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                        "limit_ms": self.budgets.max_latency_ms,
                    }),
                );
                break self
                    .failed(task, events, &judge_history, started, "the time budget")
                    .await;
            }

            match phase {
                Phase::Plan => {
                    task.plan_iterations += 1;
                    if task.plan_iterations > self.budgets.max_plan_iters {
                        warn!(
                            "Plan iteration budget exhausted ({}/{})",
                            task.plan_iterations, self.budgets.max_plan_iters
                        );
                        self.telemetry.emit(
                            Stage::Plan,
                            TelemetryEvent::JudgeLoop,
                            &ctx,
                            json!({
                                "plan_iterations": task.plan_iterations,
                                "limit": self.budgets.max_plan_iters,
                            }),
                        );
                        break self
                            .failed(task, events, &judge_history, started, "the planning budget")
                            .await;
                    }

                    events.status("Planning the task").await;
                    let plan = self
                        .planner
                        .plan(&task.user_query, &task.state, &judge_history, &ctx)
                        .await;
                    ctx.plan_json = serde_json::to_string(&plan).unwrap_or_default();
                    info!(
                        "Plan iteration {}: {} steps",
                        task.plan_iterations,
                        plan.steps.len()
                    );
                    task.plan = Some(plan);
                    phase = Phase::Act;
                }

                Phase::Act => {
                    events.status("Executing the plan").await;
                    let Some(plan) = task.plan.clone() else {
                        break self
                            .failed(task, events, &judge_history, started, "an internal error")
                            .await;
                    };
                    let outcome = self
                        .executor
                        .execute(
                            &plan,
                            &mut task.state,
                            self.budgets.max_tool_calls_per_act,
                            events,
                            &ctx,
                        )
                        .await;
                    task.total_tool_calls += outcome.tool_calls_made;

                    if task.state.ask_user_pending.is_some() {
                        phase = Phase::AskUser;
                    } else if task.total_tool_calls >= self.budgets.max_total_tool_calls {
                        warn!(
                            "Total tool-call budget exhausted ({}/{})",
                            task.total_tool_calls, self.budgets.max_total_tool_calls
                        );
                        self.telemetry.emit(
                            Stage::Act,
                            TelemetryEvent::BudgetExceeded,
                            &ctx,
                            json!({
                                "reason": "max_total_tool_calls",
                                "current": task.total_tool_calls,
                                "limit": self.budgets.max_total_tool_calls,
                            }),
                        );
                        break self
                            .failed(task, events, &judge_history, started, "the tool-call budget")
                            .await;
                    } else {
                        phase = Phase::Judge;
                    }
                }

                Phase::Judge => {
                    events.status("Reviewing the results").await;
                    let Some(plan) = task.plan.as_ref() else {
                        break self
                            .failed(task, events, &judge_history, started, "an internal error")
                            .await;
                    };
                    let verdict = self
                        .judge
                        .evaluate(plan, &task.state, task.plan_iterations, &ctx)
                        .await;
                    let goal = plan.goal.clone();
                    judge_history.push(verdict.clone());

                    if verdict.satisfied {
                        phase = Phase::Done;
                    } else if !verdict.questions.is_empty() {
                        let expects = AskExpects::infer(&verdict.questions[0]);
                        for q in &verdict.questions {
                            task.state.asked_questions.push(q.clone());
                        }
                        task.state.ask_user_pending = Some(AskUserPending {
                            ask_id: Uuid::new_v4().to_string(),
                            questions: verdict.questions.clone(),
                            expects,
                            step_id: String::new(),
                            output_key: String::new(),
                            context: goal,
                        });
                        phase = Phase::AskUser;
                    } else {
                        phase = Phase::Plan;
                    }
                }

                Phase::AskUser => {
                    let Some(pending) = task.state.ask_user_pending.clone() else {
                        break self
                            .failed(task, events, &judge_history, started, "an internal error")
                            .await;
                    };

                    self.telemetry.emit(
                        Stage::AskUser,
                        TelemetryEvent::AskUserOpen,
                        &ctx,
                        json!({
                            "ask_id": pending.ask_id,
                            "question": pending.question(),
                            "step_id": pending.step_id,
                            "expects": pending.expects,
                        }),
                    );

                    let hints = serde_json::to_value(pending.expects)
                        .ok()
                        .and_then(|v| v.as_str().map(String::from))
                        .unwrap_or_default();
                    // ask_user_open is the last event of this slice
                    events
                        .ask_user_open(&pending.ask_id, pending.question(), hints)
                        .await;

                    info!("Slice suspended on question: {}", pending.question());
                    task.touch();
                    break OrchestrationResult {
                        status: SliceStatus::WaitingForUser,
                        final_answer: None,
                        error_message: None,
                        pending_question: Some(pending.question().to_string()),
                        pending_ask_id: Some(pending.ask_id.clone()),
                        judge_history,
                        plan_iterations: task.plan_iterations,
                        total_tool_calls: task.total_tool_calls,
                        total_ms: started.elapsed().as_millis() as u64,
                    };
                }

                Phase::Done => {
                    let template = task
                        .plan
                        .as_ref()
                        .map(|p| p.final_answer_template.clone())
                        .unwrap_or_default();
                    let summary = task
                        .plan
                        .as_ref()
                        .map(|p| p.goal.clone())
                        .unwrap_or_default();
                    let answer = task.state.interpolate(&template);

                    events.content(&answer).await;
                    events.final_answer(&answer, &summary).await;

                    info!("Slice complete in {} ms", started.elapsed().as_millis());
                    task.touch();
                    break OrchestrationResult {
                        status: SliceStatus::Done,
                        final_answer: Some(answer),
                        error_message: None,
                        pending_question: None,
                        pending_ask_id: None,
                        judge_history,
                        plan_iterations: task.plan_iterations,
                        total_tool_calls: task.total_tool_calls,
                        total_ms: started.elapsed().as_millis() as u64,
                    };
                }
            }
        };

        result
    }

    /// Terminal failure: neutral user-visible message, details in telemetry
    async fn failed(
        &self,
        task: &mut ActiveTask,
        events: &EventSender,
        judge_history: &[JudgeVerdict],
        started: Instant,
        exhausted: &str,
    ) -> OrchestrationResult {
        let message = format!(
            "I couldn't finish this request within {}. A simpler or more specific request may work better.",
            exhausted
        );
        events.error("orchestration_failed", &message).await;
        task.touch();

        OrchestrationResult {
            status: SliceStatus::Failed,
            final_answer: None,
            error_message: Some(message),
            pending_question: None,
            pending_ask_id: None,
            judge_history: judge_history.to_vec(),
            plan_iterations: task.plan_iterations,
            total_tool_calls: task.total_tool_calls,
            total_ms: started.elapsed().as_millis() as u64,
        }
    }
}
