// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Driver for OpenAI-compatible chat completion APIs.
//!
//! Everything that speaks the standard `/v1/chat/completions` wire format —
//! hosted gateways, llama.cpp, vLLM, LM Studio — goes through this one
//! provider.  It covers both transports:
//!
//! - **Streaming**: SSE frames (`data: <json>`, `data: [DONE]` sentinel)
//!   parsed into [`ResponseEvent`]s as they arrive.  A persistent line
//!   buffer reassembles frames split across TCP packets.
//! - **Buffered**: a single blocking request (`stream: false`) whose reply
//!   is mapped to the same event set in one batch.
//!
//! The optional model-info probe (`GET /api/v0/models/{id}`) reports the
//! server's actual context window; absence is non-fatal.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use freja_config::ModelConfig;

use crate::{
    provider::ResponseStream, CompletionRequest, ContentPart, MessageContent, ResponseEvent, Role,
    StreamError, Usage,
};

pub struct OpenAiCompatProvider {
    model: String,
    /// Bearer token (pre-resolved from config or env).  `None` for local
    /// servers without authentication.
    auth_token: Option<String>,
    /// Full chat completions URL, e.g. `http://localhost:1234/v1/chat/completions`.
    chat_url: String,
    /// Endpoint base without the `/v1` suffix, used by the model-info probe.
    host_url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        host_url: &str,
        model: impl Into<String>,
        auth_token: Option<String>,
        temperature: f32,
        http_timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let base = host_url.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            model: model.into(),
            auth_token,
            chat_url: format!("{base}/v1/chat/completions"),
            host_url: base.to_string(),
            temperature,
            client,
        })
    }

    /// Construct a provider from the model section of the config file.
    pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Self> {
        Self::new(
            &cfg.host_url,
            cfg.model_id.clone(),
            cfg.resolve_auth_token(),
            cfg.temperature,
            std::time::Duration::from_secs(cfg.http_timeout_secs),
        )
    }

    fn request_body(&self, req: &CompletionRequest) -> Value {
        let messages = build_wire_messages(&req.messages);
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": req.stream,
            "temperature": self.temperature,
        });
        if req.stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }

    fn send(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut req = self.client.post(&self.chat_url).json(body);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        req
    }
}

#[async_trait]
impl crate::ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let body = self.request_body(&req);
        debug!(
            model = %self.model,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            "sending streaming completion request"
        );

        let resp = self
            .send(&body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.chat_url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("chat endpoint error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        // SSE events can be split across multiple TCP packets.  Maintain a
        // line buffer across chunks; emit events only for complete lines.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<anyhow::Result<ResponseEvent>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(StreamError::Transport(e.to_string()).into())],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }

    /// Native non-streaming request path.  One blocking POST with
    /// `stream: false`; the reply body is mapped to the same event set a
    /// stream would have produced.
    async fn complete_buffered(
        &self,
        mut req: CompletionRequest,
    ) -> anyhow::Result<Vec<ResponseEvent>> {
        req.stream = false;
        let body = self.request_body(&req);
        debug!(
            model = %self.model,
            message_count = req.messages.len(),
            "sending buffered completion request"
        );

        let resp = self
            .send(&body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.chat_url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("chat endpoint error {status}: {text}");
        }

        let reply: Value = resp.json().await.context("reading completion body")?;
        parse_buffered_body(&reply)
    }

    /// `GET {host}/api/v0/models/{id}` — accepts either a top-level
    /// `max_context_length` or a nested `model_info.context_length`.
    async fn probe_context_window(&self) -> Option<u32> {
        let url = format!("{}/api/v0/models/{}", self.host_url, self.model);
        let mut req = self.client.get(&url);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body: Value = resp.json().await.ok()?;
        parse_context_length(&body)
    }
}

// ─── SSE parsing ──────────────────────────────────────────────────────────────

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line (bytes not yet terminated by `\n`) is left
/// in `buf` so it can be extended by the next TCP chunk.  This is necessary
/// because a single SSE event may be split across multiple TCP packets.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        // Strip the optional Windows-style \r before \n.
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        // Advance buffer past the consumed line including the \n.
        *buf = buf[nl_pos + 1..].to_string();
        match parse_sse_data_line(&line) {
            Ok(parsed) => events.extend(parsed.into_iter().map(Ok)),
            Err(e) => events.push(Err(e.into())),
        }
    }
    events
}

/// Parse a single complete SSE `data:` line.
///
/// Returns the zero, one, or two [`ResponseEvent`]s the frame contributes
/// (a tool-call delta carrying both id/name and an argument fragment yields
/// `ToolCallStart` followed by `ToolCallArgsDelta`).  Non-data lines are
/// skipped; a data line that is not valid JSON is a hard error.
fn parse_sse_data_line(line: &str) -> Result<Vec<ResponseEvent>, StreamError> {
    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(vec![]);
    };
    if data.is_empty() {
        return Ok(vec![]);
    }
    if data == "[DONE]" {
        return Ok(vec![ResponseEvent::Done]);
    }
    let v: Value = serde_json::from_str(data)
        .map_err(|_| StreamError::MalformedFrame(truncate_for_error(data)))?;
    Ok(parse_sse_chunk(&v))
}

fn truncate_for_error(data: &str) -> String {
    const MAX: usize = 200;
    if data.len() <= MAX {
        data.to_string()
    } else {
        format!("{}…", &data[..MAX])
    }
}

fn parse_usage(usage: &Value) -> Usage {
    Usage {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(0) as u32,
    }
}

/// Map one parsed SSE JSON frame to its events.
fn parse_sse_chunk(v: &Value) -> Vec<ResponseEvent> {
    // Usage-only chunk (emitted when stream_options.include_usage = true).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return vec![ResponseEvent::Usage(parse_usage(usage))];
    }

    let delta = &v["choices"][0]["delta"];

    // Tool call delta — parallel tool calls are interleaved by "index".
    // Each index receives its id and function.name exactly once; argument
    // fragments arrive as often as the server chooses to split them.
    if let Some(tc) = delta["tool_calls"].get(0) {
        let index = tc["index"].as_u64().unwrap_or(0) as u32;
        let id = tc["id"].as_str().unwrap_or("").to_string();
        let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
        let fragment = tc["function"]["arguments"].as_str().unwrap_or("");

        let mut events = Vec::with_capacity(2);
        if !id.is_empty() || !name.is_empty() {
            events.push(ResponseEvent::ToolCallStart { index, id, name });
        }
        if !fragment.is_empty() {
            events.push(ResponseEvent::ToolCallArgsDelta {
                index,
                fragment: fragment.to_string(),
            });
        }
        return events;
    }

    // Reasoning delta — two common field names for chain-of-thought text:
    //   • `reasoning_content` — llama.cpp, Qwen3, DeepSeek-R1
    //   • `reasoning`         — OpenRouter and other aggregators
    let reasoning = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(text) = reasoning {
        if !text.is_empty() {
            return vec![ResponseEvent::ReasoningDelta(text.to_string())];
        }
    }

    // Content delta.
    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            return vec![ResponseEvent::ContentDelta(text.to_string())];
        }
    }

    vec![]
}

/// Map a non-streaming reply body to the event set a stream would have
/// produced.  Extracted as a free function so it can be unit-tested without
/// HTTP requests.
fn parse_buffered_body(reply: &Value) -> anyhow::Result<Vec<ResponseEvent>> {
    let message = reply
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| StreamError::MalformedFrame("missing choices[0].message".into()))?;

    let mut events = Vec::new();

    if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
        for (i, tc) in calls.iter().enumerate() {
            let index = i as u32;
            let id = tc["id"].as_str().unwrap_or("").to_string();
            let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
            let arguments = tc["function"]["arguments"].as_str().unwrap_or("");
            events.push(ResponseEvent::ToolCallStart { index, id, name });
            if !arguments.is_empty() {
                events.push(ResponseEvent::ToolCallArgsDelta {
                    index,
                    fragment: arguments.to_string(),
                });
            }
        }
    }

    if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            events.push(ResponseEvent::ContentDelta(text.to_string()));
        }
    }

    if let Some(usage) = reply.get("usage").filter(|u| !u.is_null()) {
        events.push(ResponseEvent::Usage(parse_usage(usage)));
    }

    events.push(ResponseEvent::Done);
    Ok(events)
}

/// Extract the context window from a model-info reply.  Both known layouts
/// are accepted:
///
/// ```json
/// { "max_context_length": 32768 }
/// { "model_info": { "context_length": 32768 } }
/// ```
fn parse_context_length(body: &Value) -> Option<u32> {
    body.get("max_context_length")
        .and_then(|v| v.as_u64())
        .or_else(|| {
            body.get("model_info")
                .and_then(|mi| mi.get("context_length"))
                .and_then(|v| v.as_u64())
        })
        .map(|n| n as u32)
}

// ─── Wire format ──────────────────────────────────────────────────────────────

fn role_str(r: &Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert a slice of [`Message`]s into the OpenAI wire-format JSON array.
///
/// **Parallel tool call coalescing**: the API requires that all tool calls
/// from one assistant turn appear inside a *single* assistant message as a
/// `tool_calls` array.  Freja stores each tool call as a separate
/// `MessageContent::ToolCall` entry internally (easier to work with), so this
/// function merges consecutive `ToolCall` messages into one JSON object
/// before sending them to the API.
pub(crate) fn build_wire_messages(messages: &[crate::Message]) -> Vec<Value> {
    fn tool_call_to_json(tool_call_id: &str, function: &crate::FunctionCall) -> Value {
        json!({
            "id": tool_call_id,
            "type": "function",
            "function": {
                "name": function.name,
                "arguments": function.arguments,
            }
        })
    }

    let mut result: Vec<Value> = Vec::with_capacity(messages.len());
    let mut i = 0;

    while i < messages.len() {
        let m = &messages[i];

        if let MessageContent::ToolCall {
            tool_call_id,
            function,
        } = &m.content
        {
            let mut calls = vec![tool_call_to_json(tool_call_id, function)];
            i += 1;
            while i < messages.len() {
                if let MessageContent::ToolCall {
                    tool_call_id,
                    function,
                } = &messages[i].content
                {
                    calls.push(tool_call_to_json(tool_call_id, function));
                    i += 1;
                } else {
                    break;
                }
            }
            result.push(json!({ "role": "assistant", "tool_calls": calls }));
            continue;
        }

        let v = match &m.content {
            MessageContent::Text(t) => json!({
                "role": role_str(&m.role),
                "content": t,
            }),
            MessageContent::Parts(parts) if !parts.is_empty() => {
                let content: Vec<Value> = parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                        ContentPart::Image { image_url } => json!({
                            "type": "image_url",
                            "image_url": { "url": image_url },
                        }),
                    })
                    .collect();
                json!({ "role": role_str(&m.role), "content": content })
            }
            MessageContent::Parts(_) => {
                json!({ "role": role_str(&m.role), "content": "" })
            }
            MessageContent::ToolCall { .. } => unreachable!("handled above"),
            MessageContent::ToolResult {
                tool_call_id,
                content,
            } => json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            }),
        };
        result.push(v);
        i += 1;
    }

    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
