//! Session manager and message routing
//!
//! Maps session IDs to active-task and pending-ask records, classifies each
//! incoming user message (new task / continuation / answer), and dispatches
//! it. The session map is guarded by a mutex for map-level operations; each
//! session record is only mutated by the one slice that holds its per-session
//! lock, so at most one slice runs per session at a time. A message arriving
//! while a slice runs is rejected with a busy error, no state change.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use serde_json::json;
use tokio::sync::Mutex as TokioMutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::EventSender;
use crate::llm::{LlmProvider, LlmRequest, Message};
use crate::orchestrator::{
    ActiveTask, AskExpects, OrchestrationResult, Orchestrator, SliceStatus,
};
use crate::router::{QueryRouter, RouteMode};
use crate::telemetry::{Stage, Telemetry, TelemetryCtx, TelemetryEvent};

/// How long an idle session survives in the map
const SESSION_EXPIRY_HOURS: i64 = 24;

/// Conversation history cap per session
const HISTORY_CAP: usize = 50;

/// Phrases that start a fresh task even while a question is pending
const NEW_TASK_KEYWORDS: &[&str] = &[
    "reset",
    "new task",
    "new question",
    "start over",
    "clear",
    "opnieuw", // Dutch: start over
];

/// A question awaiting a user reply, surviving across slices
#[derive(Debug, Clone)]
pub struct PendingAsk {
    /// Unique ask ID the UI echoes back
    pub ask_id: String,
    /// The question rendered to the user
    pub question: String,
    /// Expected answer kind
    pub expects: AskExpects,
    /// Artifact key the answer lands under
    pub output_key: String,
    /// When the question was opened
    pub created_at: DateTime<Utc>,
}

/// Per-user conversation state
#[derive(Debug)]
pub struct Session {
    /// Session ID
    pub session_id: String,
    /// In-flight orchestration, if any
    pub active_task: Option<ActiveTask>,
    /// Outstanding question, if any
    pub pending_ask: Option<PendingAsk>,
    /// Recent conversation turns
    pub history: Vec<Message>,
    /// User preferences gathered along the way
    pub preferences: HashMap<String, String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last message time
    pub last_activity: DateTime<Utc>,
}

impl Session {
    fn new(session_id: &str) -> Self {
        let now = Utc::now();
        Session {
            session_id: session_id.to_string(),
            active_task: None,
            pending_ask: None,
            history: Vec::new(),
            preferences: HashMap::new(),
            created_at: now,
            last_activity: now,
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() - self.last_activity > Duration::hours(SESSION_EXPIRY_HOURS)
    }

    fn push_history(&mut self, message: Message) {
        self.history.push(message);
        if self.history.len() > HISTORY_CAP {
            let excess = self.history.len() - HISTORY_CAP;
            self.history.drain(..excess);
        }
    }
}

/// Session manager: owns the process-wide session map
pub struct SessionManager {
    sessions: StdMutex<HashMap<String, Arc<TokioMutex<Session>>>>,
    orchestrator: Arc<Orchestrator>,
    provider: Arc<dyn LlmProvider>,
    telemetry: Arc<Telemetry>,
    router: QueryRouter,
    use_orchestrator: bool,
}

impl SessionManager {
    /// Wire the manager from its explicit dependencies
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        provider: Arc<dyn LlmProvider>,
        telemetry: Arc<Telemetry>,
        config: &Config,
    ) -> Self {
        SessionManager {
            sessions: StdMutex::new(HashMap::new()),
            orchestrator,
            provider,
            telemetry,
            router: QueryRouter::new(),
            use_orchestrator: config.use_orchestrator,
        }
    }

    /// Route one incoming user message.
    ///
    /// `echoed_ask_id` is the ask ID the UI sends back with an answer; when
    /// present it must match the outstanding question.
    pub async fn handle_message(
        &self,
        session_id: &str,
        message: &str,
        echoed_ask_id: Option<&str>,
        events: &EventSender,
    ) -> Result<OrchestrationResult> {
        let entry = self.session_entry(session_id);
        let mut session = match entry.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let text = "I'm still working on your previous message. One moment, please.";
                events.error("session_busy", text).await;
                return Err(Error::SessionBusy(session_id.to_string()));
            }
        };

        session.last_activity = Utc::now();

        // A task that idled past its window is gone, together with its question
        if session
            .active_task
            .as_ref()
            .map(|t| t.is_expired())
            .unwrap_or(false)
        {
            info!("Session {}: active task expired", session_id);
            session.active_task = None;
            session.pending_ask = None;
        }

        // Ask-id invariant: an echoed ask_id must match the outstanding ask.
        // This also makes resume idempotent on ask_id: a second delivery of
        // the same answer finds no pending ask and is rejected here.
        if let Some(echoed) = echoed_ask_id {
            let expected = session.pending_ask.as_ref().map(|p| p.ask_id.clone());
            if expected.as_deref() != Some(echoed) {
                warn!(
                    "Session {}: ask_id mismatch (expected {:?}, got {})",
                    session_id, expected, echoed
                );
                let ctx = self.session_ctx(&session, message);
                self.telemetry.emit(
                    Stage::AskUser,
                    TelemetryEvent::SessionMismatch,
                    &ctx,
                    json!({
                        "expected_ask_id": expected,
                        "actual_ask_id": echoed,
                    }),
                );
                events
                    .error(
                        "session_mismatch",
                        "That answer doesn't match the question I'm currently waiting on.",
                    )
                    .await;
                return Err(Error::AskMismatch(echoed.to_string()));
            }
        }

        session.push_history(Message::user(message));
        let is_new_task = new_task_request(message);

        // 1. Pending question + not a new-task phrase: this is the answer
        if session.pending_ask.is_some() && !is_new_task {
            return self.resume_with_answer(&mut session, message, events).await;
        }

        // 3. New-task phrase overrides whatever is in flight
        if is_new_task {
            if let Some(pending) = session.pending_ask.take() {
                let task_age = session
                    .active_task
                    .as_ref()
                    .map(|t| (Utc::now() - t.created_at).num_seconds())
                    .unwrap_or(0);
                let ctx = self.session_ctx(&session, message);
                self.telemetry.emit(
                    Stage::AskUser,
                    TelemetryEvent::AskUserIgnored,
                    &ctx,
                    json!({
                        "ask_id": pending.ask_id,
                        "question": pending.question,
                        "task_age_seconds": task_age,
                    }),
                );
                events.ask_user_close(&pending.ask_id, false).await;
            }
            session.active_task = None;

            let rest = strip_new_task_keyword(message);
            if rest.is_empty() {
                let text = "Okay, starting fresh. What would you like to do?";
                events.content(text).await;
                events.final_answer(text, "reset").await;
                return Ok(chat_result(text));
            }
            return self.start_task(&mut session, &rest, events).await;
        }

        // 2. No live task: a new task
        if session.active_task.is_none() {
            let query = message.to_string();
            return self.start_task(&mut session, &query, events).await;
        }

        // 4. Continuation of the live task: a fresh slice carries the
        // existing artifacts and counters forward, with a fresh plan budget
        // for the revised goal
        let Some(mut task) = session.active_task.take() else {
            let query = message.to_string();
            return self.start_task(&mut session, &query, events).await;
        };
        task.user_query = message.to_string();
        task.plan_iterations = 0;
        info!("Session {}: continuing task {}", session_id, task.id);

        let result = self
            .orchestrator
            .run_slice(&mut task, session_id, events)
            .await;
        self.finish_slice(&mut session, task, result)
    }

    /// Feed a pending question's answer back into the orchestration
    async fn resume_with_answer(
        &self,
        session: &mut Session,
        answer: &str,
        events: &EventSender,
    ) -> Result<OrchestrationResult> {
        let Some(pending) = session.pending_ask.take() else {
            return Err(Error::Session("no pending question".to_string()));
        };

        let ctx = self.session_ctx(session, answer);
        self.telemetry.emit(
            Stage::AskUser,
            TelemetryEvent::AskUserResume,
            &ctx,
            json!({
                "ask_id": pending.ask_id,
                "answer_len": answer.len(),
                "open_for_ms": (Utc::now() - pending.created_at).num_milliseconds(),
            }),
        );
        // Close the question card before any slice events
        events.ask_user_close(&pending.ask_id, true).await;

        let Some(mut task) = session.active_task.take() else {
            warn!(
                "Session {}: answer arrived without an active task",
                session.session_id
            );
            events
                .error("no_active_task", "I lost track of that task; please start again.")
                .await;
            return Err(Error::Session("answer without an active task".to_string()));
        };

        info!(
            "Session {}: resuming task {} with the user's answer",
            session.session_id, task.id
        );
        let result = self
            .orchestrator
            .resume(&mut task, answer, &session.session_id, events)
            .await;
        self.finish_slice(session, task, result)
    }

    /// Start a fresh task (or a one-shot chat for trivial queries)
    async fn start_task(
        &self,
        session: &mut Session,
        query: &str,
        events: &EventSender,
    ) -> Result<OrchestrationResult> {
        let decision = self.router.route(query);
        events
            .debug("info", format!("router: {:?} ({})", decision.mode, decision.reason))
            .await;

        if !self.use_orchestrator || decision.mode == RouteMode::Chat {
            return self.simple_chat(session, &decision.clean_query, events).await;
        }

        let mut task = ActiveTask::new(decision.clean_query.clone());
        info!(
            "Session {}: starting task {} for query: {}",
            session.session_id,
            task.id,
            &decision.clean_query.chars().take(100).collect::<String>()
        );

        let result = self
            .orchestrator
            .run_slice(&mut task, &session.session_id, events)
            .await;
        self.finish_slice(session, task, result)
    }

    /// Record a finished slice on the session
    fn finish_slice(
        &self,
        session: &mut Session,
        task: ActiveTask,
        result: OrchestrationResult,
    ) -> Result<OrchestrationResult> {
        match result.status {
            SliceStatus::WaitingForUser => {
                if let Some(marker) = task.state.ask_user_pending.clone() {
                    session.pending_ask = Some(PendingAsk {
                        ask_id: marker.ask_id.clone(),
                        question: marker.question().to_string(),
                        expects: marker.expects,
                        output_key: marker.answer_key(),
                        created_at: Utc::now(),
                    });
                }
                // The suspended task is retained for the resume
                session.active_task = Some(task);
            }
            SliceStatus::Done | SliceStatus::Failed => {
                // Terminated tasks are dropped; the next message starts fresh
                session.active_task = None;
            }
        }

        if let Some(answer) = &result.final_answer {
            session.push_history(Message::assistant(answer));
        }

        Ok(result)
    }

    /// One-shot chat: stream the completion straight to the chat bubble
    async fn simple_chat(
        &self,
        session: &mut Session,
        query: &str,
        events: &EventSender,
    ) -> Result<OrchestrationResult> {
        let mut messages = vec![Message::system(
            "You are a friendly, concise assistant. Answer directly.",
        )];
        // Carry a short tail of context
        let tail = session.history.len().saturating_sub(6);
        messages.extend(session.history[tail..].iter().cloned());
        if !matches!(messages.last(), Some(m) if m.content == query) {
            messages.push(Message::user(query));
        }

        let request = LlmRequest::new(messages).temperature(0.7).max_tokens(1024);

        let mut answer = String::new();
        match self.provider.generate_stream(request).await {
            Ok(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(c) => {
                            if let Some(delta) = c.delta {
                                events.content(&delta).await;
                                answer.push_str(&delta);
                            }
                        }
                        Err(e) => {
                            warn!("Chat stream broke: {}", e);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Chat streaming unavailable: {}", e);
            }
        }

        if answer.is_empty() {
            // Fall back to a non-streaming call
            let request = LlmRequest::new(vec![
                Message::system("You are a friendly, concise assistant. Answer directly."),
                Message::user(query),
            ])
            .temperature(0.7)
            .max_tokens(1024);
            match self.provider.generate(request).await {
                Ok(response) => {
                    answer = response.content.trim().to_string();
                    events.content(&answer).await;
                }
                Err(e) => {
                    warn!("Chat completion failed: {}", e);
                    events
                        .error("chat_failed", "I couldn't answer that just now; please try again.")
                        .await;
                    return Err(e);
                }
            }
        }

        events.final_answer(&answer, "chat").await;
        session.push_history(Message::assistant(&answer));
        Ok(chat_result(&answer))
    }

    /// Map-level lookup: get or create the session entry, sweeping expired
    /// sessions opportunistically
    fn session_entry(&self, session_id: &str) -> Arc<TokioMutex<Session>> {
        let mut map = match self.sessions.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        map.retain(|_, entry| match entry.try_lock() {
            Ok(session) => !session.is_expired(),
            Err(_) => true, // in use, certainly not expired
        });

        map.entry(session_id.to_string())
            .or_insert_with(|| Arc::new(TokioMutex::new(Session::new(session_id))))
            .clone()
    }

    /// Number of live sessions (for the dashboard and tests)
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn session_ctx(&self, session: &Session, message: &str) -> TelemetryCtx {
        let task_id = session
            .active_task
            .as_ref()
            .map(|t| t.id.clone())
            .unwrap_or_default();
        TelemetryCtx::new(&session.session_id, &task_id, message)
    }
}

/// Whether the message starts a fresh task
fn new_task_request(message: &str) -> bool {
    let lower = message.trim().to_lowercase();
    NEW_TASK_KEYWORDS
        .iter()
        .any(|k| lower == *k || lower.starts_with(&format!("{}:", k)) || lower.starts_with(&format!("{} ", k)))
}

/// Strip the new-task phrase, leaving the actual query (possibly empty)
fn strip_new_task_keyword(message: &str) -> String {
    let trimmed = message.trim();
    let lower = trimmed.to_lowercase();
    for keyword in NEW_TASK_KEYWORDS {
        if lower.starts_with(keyword) {
            return trimmed[keyword.len()..]
                .trim()
                .trim_start_matches([':', ',', '-'])
                .trim()
                .to_string();
        }
    }
    trimmed.to_string()
}

fn chat_result(answer: &str) -> OrchestrationResult {
    OrchestrationResult {
        status: SliceStatus::Done,
        final_answer: Some(answer.to_string()),
        error_message: None,
        pending_question: None,
        pending_ask_id: None,
        judge_history: vec![],
        plan_iterations: 0,
        total_tool_calls: 0,
        total_ms: 0,
    }
}
