// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Connection settings for the OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Endpoint base URL, e.g. `http://localhost:1234`.  The driver appends
    /// `/v1/chat/completions` itself.
    pub host_url: String,
    /// Model identifier forwarded to the API.
    pub model_id: String,
    /// Environment variable that holds the bearer token (read at runtime).
    pub auth_token_env: Option<String>,
    /// Explicit bearer token; prefer auth_token_env in config files to avoid
    /// secrets in version-controlled files.
    pub auth_token: Option<String>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub http_timeout_secs: u64,
    /// Context window fallback used when the model-info probe is unavailable.
    pub max_context_length: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            host_url: "http://localhost:1234".into(),
            model_id: "qwen2.5-coder".into(),
            auth_token_env: None,
            auth_token: None,
            temperature: 0.2,
            http_timeout_secs: 300,
            max_context_length: 32_768,
        }
    }
}

impl ModelConfig {
    /// Resolve the bearer token: explicit value wins, then the named
    /// environment variable.  `None` means the endpoint is unauthenticated
    /// (local servers).
    pub fn resolve_auth_token(&self) -> Option<String> {
        if let Some(t) = &self.auth_token {
            return Some(t.clone());
        }
        self.auth_token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty())
    }
}

/// Behaviour of the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum completion/tool round-trips per submitted turn.
    pub max_iterations: u32,
    /// Context-usage fraction at which automatic summarisation fires.
    pub auto_summarise_threshold: f32,
    /// Minimum non-system messages before summarisation is considered.
    pub min_exchanges_before_summarise: usize,
    /// Approve every risky tool call without prompting.  Intended for
    /// headless and orchestration use.
    #[serde(default)]
    pub auto_approve: bool,
    /// Re-prompt for tool calls made from inside a sandboxed code-execution
    /// scope instead of auto-approving them.
    #[serde(default)]
    pub require_mcp_approval: bool,
    /// Override for the built-in system prompt.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            auto_summarise_threshold: 0.9,
            min_exchanges_before_summarise: 4,
            auto_approve: false,
            require_mcp_approval: false,
            system_prompt: None,
        }
    }
}

/// Tool execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Default per-tool timeout.  A tool call may override this with a
    /// `timeout_secs` field in its own argument object.
    pub default_timeout_secs: u64,
    /// Interval between progress heartbeats for long-running tools.
    pub heartbeat_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 120,
            heartbeat_secs: 10,
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrently running workers.  Clamped to [1, 8].
    pub max_agents: usize,
    /// Plan persistence path.  A Markdown mirror is written next to it with
    /// the same base name.
    pub plan_file: PathBuf,
    /// Model used by the task decomposer.  Defaults to `model.model_id`.
    pub thinking_model_id: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_agents: 2,
            plan_file: PathBuf::from("current-plan.json"),
            thinking_model_id: None,
        }
    }
}

/// A statically configured peer agent reachable over the job API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Base URL of the peer's job service, e.g. `http://10.0.0.2:4519`.
    pub url: String,
    /// Bearer token for the peer, if it requires one.
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Job-service (inter-agent HTTP API) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Listen address for `freja serve`.
    pub bind: String,
    /// Bearer token required on every request.  `None` disables auth
    /// (loopback-only deployments).
    pub auth_token: Option<String>,
    /// Name advertised via `GET /api/agent/info`.
    pub agent_name: String,
    /// Capability strings advertised to peers.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Known peer agents, keyed by the name used in `agent_*` tool calls.
    #[serde(default)]
    pub peers: HashMap<String, PeerConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:4519".into(),
            auth_token: None,
            agent_name: "freja".into(),
            capabilities: Vec::new(),
            peers: HashMap::new(),
        }
    }
}

/// Session persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory for append-only JSONL session logs.  `None` disables the
    /// store.
    pub store_dir: Option<PathBuf>,
    /// Per-record cap applied to tool results at write time.  The live
    /// session always keeps the full value.
    pub tool_result_store_cap_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_dir: None,
            tool_result_store_cap_bytes: 50_000,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
