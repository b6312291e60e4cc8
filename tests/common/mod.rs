//! Shared test harness: scripted LLM provider, deterministic tools, and
//! helpers to drive the session manager while collecting events.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use taskweave::config::{BudgetConfig, Config, LlmConfig, StageConfig};
use taskweave::error::{Error, Result};
use taskweave::events::{AgentEvent, EventSender};
use taskweave::llm::{LlmProvider, LlmRequest, LlmResponse, LlmStream, StreamChunk};
use taskweave::orchestrator::{OrchestrationResult, Orchestrator};
use taskweave::session::SessionManager;
use taskweave::telemetry::Telemetry;
use taskweave::tools::{
    DateNormalizeTool, ErrorCode, FileWriteTool, MathCalcTool, TimeNowTool, Tool, ToolFailure,
    ToolMeta, ToolRegistry, ToolResult,
};

/// LLM provider that replays a fixed script of responses
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedProvider {
    pub fn new<S: Into<String>>(responses: Vec<S>) -> Self {
        ScriptedProvider {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn default_model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse> {
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Provider("script exhausted".to_string()))?;
        Ok(LlmResponse {
            content: next,
            function_calls: vec![],
            model: "scripted".to_string(),
            usage: None,
            latency_ms: 1,
        })
    }

    async fn generate_stream(&self, request: LlmRequest) -> Result<LlmStream> {
        let response = self.generate(request).await?;
        let chunks = vec![
            Ok(StreamChunk {
                delta: Some(response.content),
                function_calls: None,
                finish_reason: None,
            }),
            Ok(StreamChunk {
                delta: None,
                function_calls: Some(vec![]),
                finish_reason: Some("stop".to_string()),
            }),
        ];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Deterministic stand-in for the network weather tool
pub struct FakeWeatherTool;

#[async_trait]
impl Tool for FakeWeatherTool {
    fn name(&self) -> &str {
        "weather_get"
    }

    fn description(&self) -> &str {
        "Deterministic weather fixture"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {"type": "string"},
                "date": {"type": "string"}
            },
            "required": ["location"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult> {
        let meta = ToolMeta::new("weather_get", 1, args.clone());
        let Some(location) = args.get("location").and_then(|v| v.as_str()) else {
            return Ok(ToolResult::failure(
                ToolFailure::new(ErrorCode::InvalidInput, "Missing 'location' parameter"),
                meta,
            ));
        };
        Ok(ToolResult::success(
            json!({
                "location": location,
                "query_date": args.get("date").cloned().unwrap_or(json!("today")),
                "forecast": {
                    "precipitation_probability": 64,
                    "max_temp": 14,
                    "min_temp": 9,
                    "weather_description": "rain"
                }
            }),
            meta,
        ))
    }
}

/// Everything a scenario needs
pub struct Harness {
    pub sessions: SessionManager,
    pub telemetry_path: PathBuf,
    pub sandbox_dir: PathBuf,
    _tmp: TempDir,
}

/// Build a harness over a scripted provider and deterministic tools
pub fn harness<S: Into<String>>(responses: Vec<S>) -> Harness {
    let tmp = TempDir::new().unwrap();
    let sandbox_dir = tmp.path().join("sandbox");
    let telemetry_path = tmp.path().join("events.jsonl");

    let config = Config {
        llm: LlmConfig {
            api_key: secrecy::SecretString::from("test-key".to_string()),
            base_url: "http://localhost:0".to_string(),
            default_model: "scripted".to_string(),
            timeout_secs: 5,
        },
        stages: StageConfig {
            planner_model: "scripted".to_string(),
            planner_temperature: 0.2,
            judge_model: "scripted".to_string(),
            judge_temperature: 0.2,
            executor_model: "scripted".to_string(),
            executor_temperature: 0.1,
            max_tokens_per_stage: 2048,
        },
        budgets: BudgetConfig::default(),
        desktop_dir: sandbox_dir.clone(),
        timezone: chrono_tz::UTC,
        tools_enabled: true,
        rag_enabled: false,
        use_orchestrator: true,
        strict_json_mode: true,
        telemetry_path: telemetry_path.clone(),
    };

    let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(responses));

    let mut registry = ToolRegistry::new();
    registry.register(TimeNowTool::new(config.timezone));
    registry.register(DateNormalizeTool::new(config.timezone));
    registry.register(MathCalcTool);
    registry.register(FileWriteTool::new(sandbox_dir.clone()));
    registry.register(FakeWeatherTool);

    let telemetry = Arc::new(Telemetry::open(&telemetry_path).unwrap());
    let orchestrator = Arc::new(Orchestrator::new(
        provider.clone(),
        Arc::new(registry),
        telemetry.clone(),
        &config,
    ));
    let sessions = SessionManager::new(orchestrator, provider, telemetry, &config);

    Harness {
        sessions,
        telemetry_path,
        sandbox_dir,
        _tmp: tmp,
    }
}

/// Run one message through the session manager, collecting all events
pub async fn run_message(
    harness: &Harness,
    session_id: &str,
    message: &str,
    ask_id: Option<&str>,
) -> (Result<OrchestrationResult>, Vec<AgentEvent>) {
    let (events, mut rx) = EventSender::channel(256);
    let result = harness
        .sessions
        .handle_message(session_id, message, ask_id, &events)
        .await;
    drop(events);

    let mut collected = Vec::new();
    while let Some(event) = rx.recv().await {
        collected.push(event);
    }
    (result, collected)
}

/// Parsed telemetry records
pub fn telemetry_records(harness: &Harness) -> Vec<Value> {
    let content = std::fs::read_to_string(&harness.telemetry_path).unwrap_or_default();
    content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Count telemetry records with the given event name
pub fn telemetry_count(harness: &Harness, event: &str) -> usize {
    telemetry_records(harness)
        .iter()
        .filter(|r| r["event"] == event)
        .count()
}

/// The serialized `type` tag of an event
pub fn event_type(event: &AgentEvent) -> String {
    serde_json::to_value(event).unwrap()["type"]
        .as_str()
        .unwrap()
        .to_string()
}

/// Assert the stream ordering invariant: nothing appends to the chat bubble
/// after the slice's terminal `final_answer`/`error` event
pub fn assert_stream_ordering(events: &[AgentEvent]) {
    let terminal = events
        .iter()
        .position(|e| matches!(e, AgentEvent::FinalAnswer { .. } | AgentEvent::Error { .. }));
    if let Some(pos) = terminal {
        for event in &events[pos + 1..] {
            assert!(
                !matches!(event, AgentEvent::AssistantContent { .. }),
                "assistant_content emitted after the terminal event"
            );
        }
    }
}
