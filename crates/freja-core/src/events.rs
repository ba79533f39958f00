// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use freja_model::Usage;
use freja_tools::{ToolCall, ToolProgress};

/// Events emitted by the agent during a single turn.
///
/// Consumers (CLI, orchestrator, job service) receive these over an mpsc
/// channel in arrival order, from at most one producer task at a time.
/// Delivery is synchronous from the loop's point of view — handle quickly
/// or buffer.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model.
    ContentDelta(String),
    /// A reasoning chunk from the model.  Shown separately by front-ends;
    /// never part of session history.
    ReasoningDelta(String),
    /// The model has requested a tool call.
    ToolCallStarted(ToolCall),
    /// A tool call finished (successfully or not).
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        /// The JSON result envelope exactly as appended to the session.
        result: serde_json::Value,
        elapsed: Duration,
        is_error: bool,
    },
    /// Intermediate progress from the dispatcher (heartbeat included).
    ToolProgress(ToolProgress),
    /// Usage reported by the server for one completion.
    Usage(Usage),
    /// History was replaced by a summary; statistics for the UI.
    Summarised {
        tokens_before: usize,
        tokens_after: usize,
    },
    /// The agent has finished processing the current user turn.
    TurnComplete,
    /// The turn was cancelled; `partial_text` is whatever had streamed.
    Aborted { partial_text: String },
}
