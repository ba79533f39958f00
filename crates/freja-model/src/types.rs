// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// An assistant message carrying one tool-call request.  Parallel calls
    /// from one turn are stored as consecutive messages; the wire builder
    /// coalesces them into a single `tool_calls` array.
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: id.into(),
                function: FunctionCall {
                    name: name.into(),
                    arguments: arguments.into(),
                },
            },
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                tool_call_id: id.into(),
                content: content.into(),
            },
        }
    }

    /// Return the plain text of this message, if it is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::Parts(parts) if parts.len() == 1 => match &parts[0] {
                ContentPart::Text { text } => Some(text),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The content of a message.
///
/// - `Text` – simple string (most messages)
/// - `Parts` – mixed text + image parts for multimodal user turns
/// - `ToolCall` – the assistant requests a tool invocation
/// - `ToolResult` – the result of a tool call, as a JSON-encoded string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    ToolCall {
        tool_call_id: String,
        function: FunctionCall,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

/// A single content part in a multi-part message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        /// Data URL (`data:image/png;base64,...`) or HTTPS URL.
        image_url: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object.  Kept as a raw string because streamed
    /// partial fragments are concatenated before parsing.
    pub arguments: String,
}

/// A tool schema advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
}

/// Token usage from one completion, as reported by the server.
///
/// `total_tokens` is the server's view of the full context (prompt,
/// completion, and all tool messages) and is authoritative for context
/// tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single parsed event from the completion response.
///
/// The streaming driver yields these as SSE frames arrive; the buffered
/// driver returns the same event set in one batch.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A text chunk of the assistant's answer.
    ContentDelta(String),
    /// A chain-of-thought chunk (`reasoning_content` / `reasoning` delta).
    /// Never stored in session history.
    ReasoningDelta(String),
    /// First sighting of a tool call at `index`: its id and function name.
    /// Each index receives this exactly once per completion.
    ToolCallStart { index: u32, id: String, name: String },
    /// An argument fragment for the tool call at `index`.  Fragments are
    /// concatenated in arrival order; the parser does not validate JSON.
    ToolCallArgsDelta { index: u32, fragment: String },
    /// Final usage statistics.
    Usage(Usage),
    /// The stream finished normally (`data: [DONE]`).
    Done,
}

/// Failures produced by the stream parser and its consumers.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// An SSE data line was not valid JSON.
    #[error("malformed SSE frame: {0}")]
    MalformedFrame(String),
    /// The stream closed before `[DONE]` while tool calls were still partial.
    #[error("transport error: {0}")]
    Transport(String),
    /// The caller cancelled the completion.
    #[error("completion cancelled")]
    Cancelled,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
