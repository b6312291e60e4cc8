//! OpenAI-compatible chat completions client
//!
//! Speaks the `/chat/completions` protocol used by DeepSeek-style endpoints:
//! forced-JSON output via `response_format`, function calling via `tools`,
//! and SSE streaming. Transport failures are retried with exponential
//! backoff (two retries, 2 s base interval) before surfacing to the caller.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::provider::{LlmProvider, LlmStream};
use super::types::{FunctionCall, LlmRequest, LlmResponse, StreamChunk, Usage};

/// OpenAI-compatible LLM provider
pub struct OpenAiCompatProvider {
    client: Client,
    api_key: SecretString,
    base_url: String,
    default_model: String,
}

impl OpenAiCompatProvider {
    /// Create a new provider from transport configuration
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(OpenAiCompatProvider {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.default_model.clone(),
        })
    }

    fn build_body(&self, request: &LlmRequest, stream: bool) -> Value {
        let model = request.model.as_deref().unwrap_or(&self.default_model);

        let mut body = json!({
            "model": model,
            "messages": &request.messages,
            "stream": stream,
        });

        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = request.max_tokens {
            body["max_tokens"] = json!(n);
        }
        if request.force_json {
            body["response_format"] = json!({"type": "json_object"});
        }
        if let Some(ref schemas) = request.tools_schema {
            let tools: Vec<Value> = schemas
                .iter()
                .map(|s| json!({"type": "function", "function": s}))
                .collect();
            body["tools"] = json!(tools);
        }

        body
    }

    async fn send_once(&self, body: &Value) -> Result<ChatCompletionResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.json::<ChatCompletionResponse>().await?)
        } else {
            let text = response.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(300).collect();
            if status.as_u16() == 429 || status.is_server_error() {
                Err(Error::Provider(format!("API error {}: {}", status, excerpt)))
            } else {
                Err(Error::InvalidInput(format!(
                    "API rejected request ({}): {}",
                    status, excerpt
                )))
            }
        }
    }

    /// Send with exponential backoff on transport errors
    async fn send_with_retry(&self, body: &Value) -> Result<ChatCompletionResponse> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(2))
            .with_max_elapsed_time(Some(Duration::from_secs(10)))
            .build();

        backoff::future::retry(policy, || async {
            self.send_once(body).await.map_err(|e| {
                if e.is_retryable() {
                    warn!("LLM transport error, will retry: {}", e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let body = self.build_body(&request, false);
        let started = Instant::now();

        let wire = self.send_with_retry(&body).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("Response contained no choices".to_string()))?;

        let function_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| FunctionCall {
                id: tc.id.unwrap_or_default(),
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or_else(|_| json!({})),
            })
            .collect();

        debug!(
            "LLM response: model={}, latency_ms={}",
            wire.model.as_deref().unwrap_or("unknown"),
            latency_ms
        );

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            function_calls,
            model: wire.model.unwrap_or_else(|| self.default_model.clone()),
            usage: wire.usage,
            latency_ms,
        })
    }

    async fn generate_stream(&self, request: LlmRequest) -> Result<LlmStream> {
        let body = self.build_body(&request, true);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(300).collect();
            return Err(Error::Provider(format!(
                "Streaming request failed ({}): {}",
                status, excerpt
            )));
        }

        let state = SseState {
            body: response.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
            buffer: String::new(),
            pending: VecDeque::new(),
            calls: BTreeMap::new(),
            terminal_sent: false,
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(chunk) = st.pending.pop_front() {
                    return Some((Ok(chunk), st));
                }
                if st.done {
                    return None;
                }
                match st.body.next().await {
                    Some(Ok(bytes)) => st.feed(&bytes),
                    Some(Err(e)) => {
                        st.done = true;
                        return Some((Err(Error::Http(e)), st));
                    }
                    None => {
                        st.done = true;
                        if let Some(terminal) = st.take_terminal(None) {
                            return Some((Ok(terminal), st));
                        }
                        return None;
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

/// Incremental SSE parsing state
struct SseState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: String,
    pending: VecDeque<StreamChunk>,
    /// Tool-call fragments accumulated by index: (id, name, arguments)
    calls: BTreeMap<u32, (String, String, String)>,
    terminal_sent: bool,
    done: bool,
}

impl SseState {
    fn feed(&mut self, bytes: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();
            let Some(payload) = line.strip_prefix("data: ") else {
                continue;
            };
            if payload == "[DONE]" {
                if let Some(terminal) = self.take_terminal(None) {
                    self.pending.push_back(terminal);
                }
                continue;
            }
            let Ok(wire) = serde_json::from_str::<ChunkWire>(payload) else {
                debug!("Skipping unparseable SSE payload");
                continue;
            };
            for choice in wire.choices {
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        self.pending.push_back(StreamChunk {
                            delta: Some(content),
                            function_calls: None,
                            finish_reason: None,
                        });
                    }
                }
                for tc in choice.delta.tool_calls.unwrap_or_default() {
                    let entry = self.calls.entry(tc.index).or_default();
                    if let Some(id) = tc.id {
                        entry.0 = id;
                    }
                    if let Some(f) = tc.function {
                        if let Some(name) = f.name {
                            entry.1 = name;
                        }
                        if let Some(args) = f.arguments {
                            entry.2.push_str(&args);
                        }
                    }
                }
                if let Some(reason) = choice.finish_reason {
                    if let Some(terminal) = self.take_terminal(Some(reason)) {
                        self.pending.push_back(terminal);
                    }
                }
            }
        }
    }

    fn take_terminal(&mut self, finish_reason: Option<String>) -> Option<StreamChunk> {
        if self.terminal_sent {
            return None;
        }
        self.terminal_sent = true;

        let function_calls: Vec<FunctionCall> = std::mem::take(&mut self.calls)
            .into_values()
            .map(|(id, name, args)| FunctionCall {
                id,
                name,
                arguments: serde_json::from_str(&args).unwrap_or_else(|_| json!({})),
            })
            .collect();

        Some(StreamChunk {
            delta: None,
            function_calls: Some(function_calls),
            finish_reason: Some(finish_reason.unwrap_or_else(|| "stop".to_string())),
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChunkWire {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Message;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(&LlmConfig {
            api_key: SecretString::from("test-key".to_string()),
            base_url: server.uri(),
            default_model: "test-model".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn completion_body(content: &str) -> Value {
        json!({
            "id": "cmpl-1",
            "model": "test-model",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
    }

    #[tokio::test]
    async fn test_generate_force_json_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("{\"ok\": true}")))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .generate(LlmRequest::new(vec![Message::user("plan this")]).force_json())
            .await
            .unwrap();

        assert_eq!(response.content, "{\"ok\": true}");
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn test_generate_retries_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("recovered")))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .generate(LlmRequest::new(vec![Message::user("hi")]))
            .await
            .unwrap();

        assert_eq!(response.content, "recovered");
    }

    #[tokio::test]
    async fn test_generate_does_not_retry_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .generate(LlmRequest::new(vec![Message::user("hi")]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_sse_feed_accumulates_deltas_and_calls() {
        let mut state = SseState {
            body: futures::stream::empty().boxed(),
            buffer: String::new(),
            pending: VecDeque::new(),
            calls: BTreeMap::new(),
            terminal_sent: false,
            done: false,
        };

        state.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n");
        state.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n");
        state.feed(
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\
              \"function\":{\"name\":\"time_now\",\"arguments\":\"{}\"}}]},\
              \"finish_reason\":\"tool_calls\"}]}\n",
        );

        let chunks: Vec<StreamChunk> = state.pending.drain(..).collect();
        assert_eq!(chunks[0].delta.as_deref(), Some("Hel"));
        assert_eq!(chunks[1].delta.as_deref(), Some("lo"));
        let terminal = &chunks[2];
        assert_eq!(terminal.finish_reason.as_deref(), Some("tool_calls"));
        let calls = terminal.function_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "time_now");
    }
}
