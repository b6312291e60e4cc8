//! End-to-end orchestration scenarios over a scripted LLM provider and
//! deterministic tools: the full PLAN->ACT->JUDGE loop, ASK_USER suspension
//! and resume, budget enforcement, and the sandbox policy.

mod common;

use common::*;
use serde_json::json;

use taskweave::error::Error;
use taskweave::events::AgentEvent;
use taskweave::orchestrator::SliceStatus;

fn judge_satisfied() -> String {
    json!({"satisfied": true, "missing": [], "plan_patch": null, "questions": []}).to_string()
}

fn judge_unsatisfied(missing: &str) -> String {
    json!({"satisfied": false, "missing": [missing], "plan_patch": null, "questions": []})
        .to_string()
}

fn time_plan() -> String {
    json!({
        "goal": "tell the current time",
        "success_criteria": ["an accurate current time is reported"],
        "max_steps": 3,
        "steps": [{
            "id": "s1",
            "type": "tool_call",
            "tool": "time_now",
            "inputs": {},
            "depends_on": [],
            "expect": "the current time",
            "output_key": "time_info",
            "retry": 0
        }],
        "final_answer_template": "The time is {{time_info}}."
    })
    .to_string()
}

fn weather_plan_without_location() -> String {
    json!({
        "goal": "report tomorrow's rain risk",
        "success_criteria": ["a precipitation outlook for the user's city"],
        "max_steps": 4,
        "steps": [{
            "id": "s1",
            "type": "tool_call",
            "tool": "weather_get",
            "inputs": {"date": "tomorrow"},
            "depends_on": [],
            "expect": "a forecast with precipitation data",
            "output_key": "weather_data",
            "retry": 0
        }],
        "final_answer_template": "Rain outlook: {{weather_data}}"
    })
    .to_string()
}

fn weather_plan_with_city() -> String {
    json!({
        "goal": "report tomorrow's rain risk for the user's city",
        "success_criteria": ["a precipitation outlook for the user's city"],
        "max_steps": 4,
        "steps": [{
            "id": "s1",
            "type": "tool_call",
            "tool": "weather_get",
            "inputs": {"location": "{{user_city}}", "date": "tomorrow"},
            "depends_on": [],
            "expect": "a forecast with precipitation data",
            "output_key": "weather_data",
            "retry": 0
        }],
        "final_answer_template": "Rain outlook for {{user_city}}: {{weather_data}}"
    })
    .to_string()
}

// S1: simple temporal query runs one tool call and completes
#[tokio::test]
async fn scenario_simple_temporal() {
    let h = harness(vec![time_plan(), judge_satisfied()]);

    let (result, events) = run_message(&h, "s1-session", "What time is it?", None).await;
    let result = result.unwrap();

    assert_eq!(result.status, SliceStatus::Done);
    assert_eq!(result.total_tool_calls, 1);
    assert_eq!(result.plan_iterations, 1);

    let answer = result.final_answer.unwrap();
    assert!(answer.starts_with("The time is "));
    // every placeholder was substituted, with an HH:MM:SS time string
    assert!(!answer.contains("{{"));
    assert_eq!(answer.matches(':').count(), 2);

    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::FinalAnswer { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::ToolTrace { tool, .. } if tool == "time_now")));
    assert_stream_ordering(&events);
}

// S2 + S3: a weather query without a location suspends on a city question,
// and the same session resumes with the answer
#[tokio::test]
async fn scenario_weather_suspend_and_resume() {
    let h = harness(vec![
        weather_plan_without_location(),
        weather_plan_with_city(),
        judge_satisfied(),
    ]);

    // S2: suspension, no dispatch, no final answer
    let (r1, e1) = run_message(&h, "w-session", "Will it rain tomorrow?", None).await;
    let r1 = r1.unwrap();
    assert_eq!(r1.status, SliceStatus::WaitingForUser);
    assert!(r1.final_answer.is_none());
    assert_eq!(r1.total_tool_calls, 0);

    let ask_id = r1.pending_ask_id.clone().unwrap();
    match e1.last().unwrap() {
        AgentEvent::AskUserOpen {
            question, hints, ..
        } => {
            assert!(question.to_lowercase().contains("city"));
            assert_eq!(hints, "city");
        }
        other => panic!("slice must end with ask_user_open, got {:?}", other),
    }
    assert_eq!(telemetry_count(&h, "ASK_USER_OPEN"), 1);

    // S3: the answer forces a replan that runs the weather call
    let (r2, e2) = run_message(&h, "w-session", "Rotterdam", Some(&ask_id)).await;
    let r2 = r2.unwrap();
    assert_eq!(r2.status, SliceStatus::Done);
    assert_eq!(r2.total_tool_calls, 1);

    let answer = r2.final_answer.unwrap();
    assert!(answer.contains("Rotterdam"));
    assert!(answer.contains("precipitation"));
    assert!(!answer.contains("{{"));

    assert_eq!(event_type(&e2[0]), "ask_user_close");
    assert_eq!(telemetry_count(&h, "ASK_USER_RESUME"), 1);
    assert_stream_ordering(&e2);

    // Resume is idempotent on ask_id: a second delivery is a mismatch,
    // not a double-write
    let (r3, _) = run_message(&h, "w-session", "Rotterdam", Some(&ask_id)).await;
    assert!(matches!(r3.unwrap_err(), Error::AskMismatch(_)));
    assert_eq!(telemetry_count(&h, "SESSION_MISMATCH"), 1);
}

// S4: a plan needing seven tool calls trips the total budget
#[tokio::test]
async fn scenario_budget_overflow() {
    let steps: Vec<_> = (1..=7)
        .map(|i| {
            json!({
                "id": format!("s{}", i),
                "type": "tool_call",
                "tool": "time_now",
                "inputs": {},
                "depends_on": [],
                "expect": "a timestamp",
                "output_key": format!("t{}", i),
                "retry": 0
            })
        })
        .collect();
    let plan = json!({
        "goal": "run every lettered step",
        "success_criteria": ["all seven results are present"],
        "max_steps": 7,
        "steps": steps,
        "final_answer_template": "{{t7}}"
    })
    .to_string();

    let h = harness(vec![
        plan.clone(),
        judge_unsatisfied("later steps have not run yet"),
        plan,
    ]);

    let (result, events) = run_message(
        &h,
        "b-session",
        "do A then B then C then D then E then F then G and write a report",
        None,
    )
    .await;
    let result = result.unwrap();

    assert_eq!(result.status, SliceStatus::Failed);
    assert_eq!(result.total_tool_calls, 6);
    assert!(result.error_message.unwrap().contains("tool-call budget"));
    assert_eq!(telemetry_count(&h, "BUDGET_EXCEEDED"), 1);

    assert!(events.iter().any(|e| matches!(e, AgentEvent::Error { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, AgentEvent::AssistantContent { .. })));
}

// S5: a new-task phrase discards the pending question and runs arithmetic
#[tokio::test]
async fn scenario_new_task_overrides_pending_ask() {
    let math_plan = json!({
        "goal": "evaluate the expression",
        "success_criteria": ["the exact numeric result"],
        "max_steps": 2,
        "steps": [{
            "id": "s1",
            "type": "tool_call",
            "tool": "math_calc",
            "inputs": {"expression": "2+2"},
            "depends_on": [],
            "expect": "the numeric result",
            "output_key": "calc",
            "retry": 0
        }],
        "final_answer_template": "{{calc}}"
    })
    .to_string();

    let h = harness(vec![
        weather_plan_without_location(),
        math_plan,
        judge_satisfied(),
    ]);

    let (r1, _) = run_message(&h, "n-session", "Will it rain tomorrow?", None).await;
    assert_eq!(r1.unwrap().status, SliceStatus::WaitingForUser);

    let (r2, e2) = run_message(&h, "n-session", "new task: what's 2+2", None).await;
    let r2 = r2.unwrap();
    assert_eq!(r2.status, SliceStatus::Done);
    assert_eq!(r2.final_answer.unwrap(), "4");

    assert_eq!(telemetry_count(&h, "ASK_USER_IGNORED"), 1);
    assert!(e2
        .iter()
        .any(|e| matches!(e, AgentEvent::AskUserClose { accepted: false, .. })));
}

// S6: a write aimed outside the sandbox is denied and the run fails
#[tokio::test]
async fn scenario_sandbox_violation() {
    let plan = json!({
        "goal": "save the notes to a file",
        "success_criteria": ["the file exists with the compiled notes"],
        "max_steps": 4,
        "steps": [
            {
                "id": "s1",
                "type": "summarize",
                "inputs": {"text": "compile the notes"},
                "depends_on": [],
                "expect": "compiled notes",
                "output_key": "notes",
                "retry": 0
            },
            {
                "id": "s2",
                "type": "write_file",
                "inputs": {"path": "/etc/passwd", "content": "{{notes}}"},
                "depends_on": ["s1"],
                "expect": "a write receipt",
                "output_key": "file_receipt",
                "retry": 0
            }
        ],
        "final_answer_template": "Saved: {{file_receipt}}"
    })
    .to_string();

    let h = harness(vec![
        plan.clone(),
        "Compiled notes.".to_string(),
        judge_unsatisfied("the file was not written"),
        plan,
        judge_unsatisfied("the file was not written"),
    ]);

    let (result, events) = run_message(
        &h,
        "sb-session",
        "write my notes into /etc/passwd as a file please",
        None,
    )
    .await;
    let result = result.unwrap();

    assert_eq!(result.status, SliceStatus::Failed);
    assert!(result.error_message.unwrap().contains("planning budget"));
    assert_eq!(telemetry_count(&h, "WRITE_OUT_OF_SANDBOX"), 1);
    assert_eq!(telemetry_count(&h, "JUDGE_LOOP"), 1);

    // the denial is visible on the tool panel
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::ToolTrace { tool, result, .. }
            if tool == "file_write" && result.contains("error")
    )));
    // nothing was written anywhere
    assert!(!h.sandbox_dir.join("etc").exists());
}

// A greeting takes the chat short-circuit: one streamed completion,
// no planning
#[tokio::test]
async fn scenario_chat_short_circuit() {
    let h = harness(vec!["Hello! How can I help today?".to_string()]);

    let (result, events) = run_message(&h, "c-session", "hello there", None).await;
    let result = result.unwrap();

    assert_eq!(result.status, SliceStatus::Done);
    assert_eq!(result.plan_iterations, 0);
    assert_eq!(result.total_tool_calls, 0);
    assert_eq!(
        result.final_answer.unwrap(),
        "Hello! How can I help today?"
    );

    // content streams before the terminal marker
    let content_pos = events
        .iter()
        .position(|e| matches!(e, AgentEvent::AssistantContent { .. }))
        .unwrap();
    let final_pos = events
        .iter()
        .position(|e| matches!(e, AgentEvent::FinalAnswer { .. }))
        .unwrap();
    assert!(content_pos < final_pos);
    assert_stream_ordering(&events);
}

// A malformed planner response burns the retry, then the fallback plan
// answers through the summarize stage
#[tokio::test]
async fn scenario_planner_fallback() {
    let h = harness(vec![
        "I think I should check the time first.".to_string(), // not JSON
        "Still not JSON, sorry.".to_string(),                 // retry also fails
        "A direct answer from the fallback plan.".to_string(), // summarize call
        judge_satisfied(),
    ]);

    let (result, _) = run_message(&h, "f-session", "plan my afternoon schedule", None).await;
    let result = result.unwrap();

    assert_eq!(result.status, SliceStatus::Done);
    assert_eq!(
        result.final_answer.unwrap(),
        "A direct answer from the fallback plan."
    );
    assert_eq!(telemetry_count(&h, "PLANNER_NON_JSON"), 2);
}
