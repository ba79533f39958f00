// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Peer-agent tools: `agent_list`, `agent_submit`, `agent_status`,
//! `agent_result`, `agent_cancel`.
//!
//! These give the model the ability to discover configured peer agents and
//! delegate work to them over the job API: submit returns immediately with
//! a job id, and the model polls for the result.  Peers are configured
//! statically — there is no way to target an arbitrary address.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use freja_config::PeerConfig;
use freja_tools::{RiskLevel, Tool, ToolCall};

use crate::client::PeerClient;
use crate::jobs::JobStatus;

/// Shared peer roster for all `agent_*` tools.
pub struct PeerRoster {
    peers: HashMap<String, PeerConfig>,
}

impl PeerRoster {
    pub fn new(peers: HashMap<String, PeerConfig>) -> Arc<Self> {
        Arc::new(Self { peers })
    }

    fn client(&self, peer: &str) -> anyhow::Result<PeerClient> {
        let Some(cfg) = self.peers.get(peer) else {
            let known: Vec<&str> = self.peers.keys().map(String::as_str).collect();
            anyhow::bail!(
                "unknown peer '{peer}'; configured peers: {}",
                if known.is_empty() {
                    "(none)".to_string()
                } else {
                    known.join(", ")
                }
            );
        };
        Ok(PeerClient::new(cfg))
    }
}

fn required_str<'a>(call: &'a ToolCall, key: &str) -> anyhow::Result<&'a str> {
    call.args
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("missing required parameter: {key}"))
}

// ── agent_list ───────────────────────────────────────────────────────────────

/// Lists configured peers, probing each for liveness and capabilities.
pub struct AgentListTool {
    pub roster: Arc<PeerRoster>,
}

#[async_trait]
impl Tool for AgentListTool {
    fn name(&self) -> &str {
        "agent_list"
    }

    fn description(&self) -> &str {
        "List the peer agents this agent can delegate work to, with their \
         capabilities and availability. Use this before agent_submit."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::AgentCommunication
    }

    async fn execute(&self, _call: &ToolCall) -> anyhow::Result<Value> {
        let mut peers = Vec::new();
        for (name, cfg) in &self.roster.peers {
            let entry = match PeerClient::new(cfg).info().await {
                Ok(info) => json!({
                    "name": name,
                    "url": cfg.url,
                    "online": true,
                    "agent_name": info.name,
                    "capabilities": info.capabilities,
                    "busy": info.current_job_id.is_some(),
                }),
                Err(e) => json!({
                    "name": name,
                    "url": cfg.url,
                    "online": false,
                    "error": e.to_string(),
                }),
            };
            peers.push(entry);
        }
        Ok(json!({ "peers": peers }))
    }
}

// ── agent_submit ─────────────────────────────────────────────────────────────

/// Submits a prompt to a peer and returns the job id without waiting.
pub struct AgentSubmitTool {
    pub roster: Arc<PeerRoster>,
}

#[async_trait]
impl Tool for AgentSubmitTool {
    fn name(&self) -> &str {
        "agent_submit"
    }

    fn description(&self) -> &str {
        "Delegate a task to a peer agent. Returns a job_id immediately; use \
         agent_status to poll and agent_result to fetch the final answer. \
         Include everything the peer needs in the prompt — it shares no \
         context with you."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["peer", "prompt"],
            "properties": {
                "peer": { "type": "string", "description": "Peer name from agent_list" },
                "prompt": { "type": "string", "description": "Full task description for the peer" },
                "system_prompt": { "type": "string", "description": "Optional system prompt override" }
            }
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::AgentCommunication
    }

    async fn execute(&self, call: &ToolCall) -> anyhow::Result<Value> {
        let peer = required_str(call, "peer")?;
        let prompt = required_str(call, "prompt")?;
        let system_prompt = call.args.get("system_prompt").and_then(|v| v.as_str());
        let job_id = self
            .roster
            .client(peer)?
            .submit(prompt, system_prompt)
            .await?;
        Ok(json!({ "peer": peer, "job_id": job_id }))
    }
}

// ── agent_status ─────────────────────────────────────────────────────────────

/// Reports a job's status and journal.
pub struct AgentStatusTool {
    pub roster: Arc<PeerRoster>,
}

#[async_trait]
impl Tool for AgentStatusTool {
    fn name(&self) -> &str {
        "agent_status"
    }

    fn description(&self) -> &str {
        "Check the status of a job previously submitted with agent_submit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["peer", "job_id"],
            "properties": {
                "peer": { "type": "string" },
                "job_id": { "type": "string" }
            }
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::AgentCommunication
    }

    async fn execute(&self, call: &ToolCall) -> anyhow::Result<Value> {
        let peer = required_str(call, "peer")?;
        let job_id = required_str(call, "job_id")?;
        let job = self.roster.client(peer)?.status(job_id).await?;
        Ok(json!({
            "job_id": job.id,
            "status": job.status,
            "journal": job.journal,
        }))
    }
}

// ── agent_result ─────────────────────────────────────────────────────────────

/// Fetches the final result of a finished job.
pub struct AgentResultTool {
    pub roster: Arc<PeerRoster>,
}

#[async_trait]
impl Tool for AgentResultTool {
    fn name(&self) -> &str {
        "agent_result"
    }

    fn description(&self) -> &str {
        "Fetch the result of a completed job. If the job is still running, \
         the reply says so — poll agent_status and try again."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["peer", "job_id"],
            "properties": {
                "peer": { "type": "string" },
                "job_id": { "type": "string" }
            }
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::AgentCommunication
    }

    async fn execute(&self, call: &ToolCall) -> anyhow::Result<Value> {
        let peer = required_str(call, "peer")?;
        let job_id = required_str(call, "job_id")?;
        let job = self.roster.client(peer)?.status(job_id).await?;
        match job.status {
            JobStatus::Completed => Ok(json!({
                "job_id": job.id,
                "status": job.status,
                "result": job.result,
            })),
            JobStatus::Failed | JobStatus::Cancelled => Ok(json!({
                "job_id": job.id,
                "status": job.status,
                "error": job.error,
            })),
            JobStatus::Pending | JobStatus::Running => Ok(json!({
                "job_id": job.id,
                "status": job.status,
                "error": "job has not finished yet; poll agent_status",
            })),
        }
    }
}

// ── agent_cancel ─────────────────────────────────────────────────────────────

/// Cancels a running job on a peer.
pub struct AgentCancelTool {
    pub roster: Arc<PeerRoster>,
}

#[async_trait]
impl Tool for AgentCancelTool {
    fn name(&self) -> &str {
        "agent_cancel"
    }

    fn description(&self) -> &str {
        "Cancel a job previously submitted to a peer agent."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["peer", "job_id"],
            "properties": {
                "peer": { "type": "string" },
                "job_id": { "type": "string" }
            }
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::AgentCommunication
    }

    async fn execute(&self, call: &ToolCall) -> anyhow::Result<Value> {
        let peer = required_str(call, "peer")?;
        let job_id = required_str(call, "job_id")?;
        let cancelled = self.roster.client(peer)?.cancel(job_id).await?;
        Ok(json!({ "job_id": job_id, "cancelled": cancelled }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
