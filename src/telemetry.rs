//! Telemetry sink
//!
//! Appends one JSON line per event to a configurable path. Records carry a
//! stable SHA-256 prefix of `user_query + plan` for replay deduplication.
//! Storage and rotation are external concerns; this sink only appends.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

/// Pipeline stage a telemetry event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Act,
    Judge,
    AskUser,
}

/// Telemetry event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TelemetryEvent {
    PlannerNonJson,
    PlanEmptyOrUseless,
    ExecToolFail,
    ExecParamInvalid,
    BudgetExceeded,
    AskUserIgnored,
    AskUserOpen,
    AskUserResume,
    SessionMismatch,
    JudgeLoop,
    SpecMismatch,
    WriteOutOfSandbox,
}

/// Per-orchestration identifiers threaded through every record
#[derive(Debug, Clone, Default)]
pub struct TelemetryCtx {
    /// Request ID, unique per orchestration slice
    pub request_id: String,
    /// Owning session
    pub session_id: String,
    /// Owning active task
    pub active_task_id: String,
    /// The triggering user query
    pub user_query: String,
    /// Compact JSON of the current plan (empty before planning)
    pub plan_json: String,
    /// Budget snapshot
    pub limits: Value,
    /// Stage-model assignment snapshot
    pub model: Value,
}

impl TelemetryCtx {
    /// Create a context for a new slice
    pub fn new(session_id: &str, active_task_id: &str, user_query: &str) -> Self {
        TelemetryCtx {
            request_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            active_task_id: active_task_id.to_string(),
            user_query: user_query.to_string(),
            plan_json: String::new(),
            limits: Value::Null,
            model: Value::Null,
        }
    }
}

/// Append-only JSONL telemetry sink
pub struct Telemetry {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl Telemetry {
    /// Open (or create) the sink at the given path
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Telemetry {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    /// A sink that discards every record
    pub fn disabled() -> Self {
        Telemetry {
            path: PathBuf::new(),
            file: Mutex::new(None),
        }
    }

    /// Path the sink writes to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one event
    pub fn emit(&self, stage: Stage, event: TelemetryEvent, ctx: &TelemetryCtx, context: Value) {
        self.emit_full(stage, event, ctx, context, Value::Null, Value::Null)
    }

    /// Record one event with plan and artifact excerpts
    pub fn emit_full(
        &self,
        stage: Stage,
        event: TelemetryEvent,
        ctx: &TelemetryCtx,
        context: Value,
        plan_excerpt: Value,
        artifacts_excerpt: Value,
    ) {
        let record = json!({
            "ts": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            "request_id": ctx.request_id,
            "session_id": ctx.session_id,
            "active_task_id": ctx.active_task_id,
            "stage": stage,
            "event": event,
            "context": context,
            "plan_excerpt": plan_excerpt,
            "artifacts_excerpt": artifacts_excerpt,
            "limits": ctx.limits,
            "model": ctx.model,
            "hash": replay_hash(&ctx.user_query, &ctx.plan_json),
        });

        let mut guard = match self.file.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(file) = guard.as_mut() {
            if let Err(e) = writeln!(file, "{}", record) {
                warn!("Telemetry write failed: {}", e);
            }
        }
    }
}

/// Stable replay-dedup hash: first 16 hex chars of SHA-256(user_query + plan)
pub fn replay_hash(user_query: &str, plan_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_query.as_bytes());
    hasher.update(plan_json.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}
