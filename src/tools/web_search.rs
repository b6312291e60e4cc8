//! Web search tool
//!
//! Uses the DuckDuckGo Instant Answer API (no API key required) and returns
//! title/url/snippet triples in the envelope.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::traits::{str_arg, ErrorCode, Tool, ToolFailure, ToolMeta, ToolResult};
use crate::error::Result;

#[derive(Debug, Deserialize)]
struct InstantAnswer {
    #[serde(rename = "AbstractText")]
    abstract_text: Option<String>,
    #[serde(rename = "AbstractURL")]
    abstract_url: Option<String>,
    #[serde(rename = "Heading")]
    heading: Option<String>,
    #[serde(rename = "RelatedTopics")]
    related_topics: Option<Vec<RelatedTopic>>,
}

#[derive(Debug, Deserialize)]
struct RelatedTopic {
    #[serde(rename = "Text")]
    text: Option<String>,
    #[serde(rename = "FirstURL")]
    first_url: Option<String>,
}

/// Built-in tool: web search
pub struct WebSearchTool {
    client: Client,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSearchTool {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(8))
            .user_agent("taskweave/0.1")
            .build()
            .unwrap_or_default();
        WebSearchTool { client }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web; returns result titles, URLs, and snippets"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of results to return (1-10, default 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult> {
        let started = Instant::now();
        let meta = |started: &Instant, args: Value| {
            ToolMeta::new("web_search", started.elapsed().as_millis() as u64, args)
        };

        let Some(query) = str_arg(&args, "query") else {
            return Ok(ToolResult::failure(
                ToolFailure::new(ErrorCode::InvalidInput, "Missing 'query' parameter"),
                meta(&started, args),
            ));
        };
        let count = args
            .get("count")
            .and_then(|v| v.as_u64())
            .map(|c| c.min(10) as usize)
            .unwrap_or(5);

        let response = match self
            .client
            .get("https://api.duckduckgo.com/")
            .query(&[
                ("q", query.as_str()),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return Ok(ToolResult::failure(
                    ToolFailure::new(ErrorCode::Network, format!("Search request failed: {}", e)),
                    meta(&started, args),
                ));
            }
        };

        if !response.status().is_success() {
            let code = if response.status().as_u16() == 429 {
                ErrorCode::RateLimit
            } else {
                ErrorCode::Network
            };
            return Ok(ToolResult::failure(
                ToolFailure::new(code, format!("Search API returned {}", response.status())),
                meta(&started, args),
            ));
        }

        let answer: InstantAnswer = match response.json().await {
            Ok(a) => a,
            Err(e) => {
                return Ok(ToolResult::failure(
                    ToolFailure::new(ErrorCode::Network, format!("Search response unreadable: {}", e)),
                    meta(&started, args),
                ));
            }
        };

        let mut results = Vec::new();

        if let (Some(text), Some(url)) = (&answer.abstract_text, &answer.abstract_url) {
            if !text.is_empty() {
                results.push(json!({
                    "title": answer.heading.clone().unwrap_or_else(|| query.clone()),
                    "url": url,
                    "snippet": text,
                }));
            }
        }

        for topic in answer.related_topics.unwrap_or_default() {
            if results.len() >= count {
                break;
            }
            if let (Some(text), Some(url)) = (topic.text, topic.first_url) {
                let title = text.split(" - ").next().unwrap_or(&text).to_string();
                results.push(json!({"title": title, "url": url, "snippet": text}));
            }
        }

        Ok(ToolResult::success(
            json!({"query": query, "results": results}),
            meta(&started, args),
        ))
    }
}
