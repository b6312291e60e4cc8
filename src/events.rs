//! UI event protocol
//!
//! Eight event variants, each serialized as a `{type, payload}` record.
//! Routing invariant: `assistant_content` deltas are the only events that
//! append to the chat bubble; every other variant goes to a side panel.
//! Events travel over a bounded channel so a slow client back-pressures the
//! producing slice; once the receiver is gone, sends are dropped silently
//! and the slice runs to completion.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// An event emitted by an orchestration slice
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental assistant text for the chat bubble
    AssistantContent { delta: String },
    /// Progress message for the status bar
    Status { message: String },
    /// Tool invocation record for the tool panel
    ToolTrace {
        tool: String,
        action: String,
        result: String,
    },
    /// Diagnostic detail for the debug panel
    Debug { level: String, message: String },
    /// A clarifying question card; terminates the slice
    AskUserOpen {
        ask_id: String,
        question: String,
        hints: String,
    },
    /// Closes a question card; emitted at resume start
    AskUserClose { ask_id: String, accepted: bool },
    /// End-of-slice marker with the rendered answer
    FinalAnswer { answer: String, summary: String },
    /// Error display
    Error { code: String, message: String },
}

/// Sending half of the event stream
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<AgentEvent>,
}

impl EventSender {
    /// Create a bounded event channel
    pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (EventSender { tx }, rx)
    }

    /// A sender whose receiver was dropped; every send is a no-op.
    /// Used by callers that only want the returned result.
    pub fn disconnected() -> EventSender {
        let (tx, _rx) = mpsc::channel(1);
        EventSender { tx }
    }

    /// Send an event, awaiting channel capacity; dropped if the client is gone
    pub async fn send(&self, event: AgentEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("Event dropped: client disconnected");
        }
    }

    /// Emit a status-bar message
    pub async fn status(&self, message: impl Into<String>) {
        self.send(AgentEvent::Status {
            message: message.into(),
        })
        .await;
    }

    /// Emit a chat-bubble content delta
    pub async fn content(&self, delta: impl Into<String>) {
        self.send(AgentEvent::AssistantContent {
            delta: delta.into(),
        })
        .await;
    }

    /// Emit a tool-panel trace record
    pub async fn tool_trace(
        &self,
        tool: impl Into<String>,
        action: impl Into<String>,
        result: impl Into<String>,
    ) {
        self.send(AgentEvent::ToolTrace {
            tool: tool.into(),
            action: action.into(),
            result: result.into(),
        })
        .await;
    }

    /// Emit a debug-panel record
    pub async fn debug(&self, level: impl Into<String>, message: impl Into<String>) {
        self.send(AgentEvent::Debug {
            level: level.into(),
            message: message.into(),
        })
        .await;
    }

    /// Open a question card; this is the last event of the slice
    pub async fn ask_user_open(
        &self,
        ask_id: impl Into<String>,
        question: impl Into<String>,
        hints: impl Into<String>,
    ) {
        self.send(AgentEvent::AskUserOpen {
            ask_id: ask_id.into(),
            question: question.into(),
            hints: hints.into(),
        })
        .await;
    }

    /// Close a question card at resume start
    pub async fn ask_user_close(&self, ask_id: impl Into<String>, accepted: bool) {
        self.send(AgentEvent::AskUserClose {
            ask_id: ask_id.into(),
            accepted,
        })
        .await;
    }

    /// Emit the end-of-slice answer
    pub async fn final_answer(&self, answer: impl Into<String>, summary: impl Into<String>) {
        self.send(AgentEvent::FinalAnswer {
            answer: answer.into(),
            summary: summary.into(),
        })
        .await;
    }

    /// Emit an error display record
    pub async fn error(&self, code: impl Into<String>, message: impl Into<String>) {
        self.send(AgentEvent::Error {
            code: code.into(),
            message: message.into(),
        })
        .await;
    }
}
