// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model, with its fragmented
/// argument string already assembled and parsed.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier from the model (or a synthesised one when the
    /// server omitted it).
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// Risk classification used by the permission arbiter.
///
/// `ReadOnly` tools are always permitted; every other level requires
/// arbitration before the tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    /// Inspects state without changing it (file reads, searches).
    ReadOnly,
    /// Mutates the workspace or spawns processes.
    Write,
    /// Drives a browser or other UI automation.
    UiAutomation,
    /// Talks to peer agents over the job API.
    AgentCommunication,
}

/// Trait that every built-in and user-defined tool must implement.
///
/// `execute` returns the tool's structured result object.  Errors are
/// captured by the dispatcher and shaped into an `{"error": …}` envelope;
/// the agent loop never crashes on a tool fault.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    fn risk_level(&self) -> RiskLevel;
    /// Whether this tool emits meaningful intermediate progress.  The
    /// dispatcher heartbeats long-running tools either way; this flag lets
    /// front-ends decide how to render the activity.
    fn supports_progress(&self) -> bool {
        false
    }
    async fn execute(&self, call: &ToolCall) -> anyhow::Result<Value>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
