// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-process job queue for the inter-agent API.
//!
//! A job is one external request: a prompt run through a fresh agent-loop
//! session.  Jobs live in a concurrent map; each carries an append-only
//! journal of short status strings, and each running job owns a broadcast
//! channel that mirrors its agent events to any number of SSE subscribers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use freja_config::AgentConfig;
use freja_core::{Agent, AgentEvent};
use freja_model::ModelProvider;
use freja_tools::Dispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub prompt: String,
    pub status: JobStatus,
    /// Append-only list of short status strings.
    pub journal: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Runs one prompt to completion.  The seam keeps the job machinery
/// testable without a model endpoint; production uses [`AgentJobExecutor`].
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        events: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<String>;
}

/// Production executor: a fresh agent-loop session per job.
pub struct AgentJobExecutor {
    pub model: Arc<dyn ModelProvider>,
    pub dispatcher: Arc<Dispatcher>,
    pub agent_config: Arc<AgentConfig>,
    pub max_context_tokens: usize,
}

#[async_trait]
impl JobExecutor for AgentJobExecutor {
    async fn execute(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        events: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<String> {
        let mut config = (*self.agent_config).clone();
        if let Some(sp) = system_prompt {
            config.system_prompt = Some(sp.to_string());
        }
        let mut agent = Agent::new(
            self.model.clone(),
            self.dispatcher.clone(),
            Arc::new(config),
            self.max_context_tokens,
        );
        let outcome = agent.submit(prompt, events, cancel).await?;
        agent.append_assistant(&outcome.content);
        Ok(outcome.content)
    }
}

/// Owns all jobs of one agent process.
pub struct JobService {
    executor: Arc<dyn JobExecutor>,
    agent_name: String,
    capabilities: Vec<String>,
    jobs: DashMap<String, Job>,
    cancels: DashMap<String, CancellationToken>,
    streams: DashMap<String, broadcast::Sender<String>>,
    /// Id of the most recently created job.
    current: Mutex<Option<String>>,
}

impl JobService {
    pub fn new(
        executor: Arc<dyn JobExecutor>,
        agent_name: impl Into<String>,
        capabilities: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            agent_name: agent_name.into(),
            capabilities,
            jobs: DashMap::new(),
            cancels: DashMap::new(),
            streams: DashMap::new(),
            current: Mutex::new(None),
        })
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Enqueue a job and return its id immediately; the work runs on its
    /// own task.
    pub async fn submit(
        self: &Arc<Self>,
        prompt: String,
        system_prompt: Option<String>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let job = Job {
            id: id.clone(),
            prompt: prompt.clone(),
            status: JobStatus::Pending,
            journal: vec!["queued".into()],
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.jobs.insert(id.clone(), job);
        let (stream_tx, _) = broadcast::channel(256);
        self.streams.insert(id.clone(), stream_tx);
        let cancel = CancellationToken::new();
        self.cancels.insert(id.clone(), cancel.clone());
        *self.current.lock().await = Some(id.clone());

        info!(job_id = %id, "job queued");
        let service = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            service.run_job(job_id, prompt, system_prompt, cancel).await;
        });
        id
    }

    async fn run_job(
        self: Arc<Self>,
        id: String,
        prompt: String,
        system_prompt: Option<String>,
        cancel: CancellationToken,
    ) {
        self.update(&id, |job| {
            job.status = JobStatus::Running;
            job.journal.push("started".into());
        });

        // Relay agent events: journal entries for the milestones, JSON
        // frames for SSE subscribers.
        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        let relay = {
            let service = self.clone();
            let id = id.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    service.relay_event(&id, &event);
                }
            })
        };

        let result = self
            .executor
            .execute(&prompt, system_prompt.as_deref(), tx, cancel.clone())
            .await;
        let _ = relay.await;

        self.update(&id, |job| {
            job.completed_at = Some(Utc::now());
            match &result {
                Ok(content) => {
                    job.status = JobStatus::Completed;
                    job.result = Some(content.clone());
                    job.journal.push("completed".into());
                }
                Err(e) if cancel.is_cancelled() => {
                    job.status = JobStatus::Cancelled;
                    job.error = Some(e.to_string());
                    job.journal.push("cancelled".into());
                }
                Err(e) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(e.to_string());
                    job.journal.push(format!("failed: {e}"));
                }
            }
        });
        self.cancels.remove(&id);
        info!(job_id = %id, ok = result.is_ok(), "job finished");
    }

    fn relay_event(&self, id: &str, event: &AgentEvent) {
        match event {
            AgentEvent::ToolCallStarted(tc) => {
                self.update(id, |job| job.journal.push(format!("tool: {}", tc.name)));
            }
            AgentEvent::Summarised { .. } => {
                self.update(id, |job| job.journal.push("context summarised".into()));
            }
            _ => {}
        }
        if let Some(stream) = self.streams.get(id) {
            if let Ok(frame) = serde_json::to_string(&event_frame(event)) {
                // No subscribers is fine; send only fails then.
                let _ = stream.send(frame);
            }
        }
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut Job)) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            f(&mut job);
        } else {
            warn!(job_id = %id, "update for unknown job");
        }
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|j| j.clone())
    }

    /// The most recently created job.
    pub async fn current(&self) -> Option<Job> {
        let id = self.current.lock().await.clone()?;
        self.get(&id)
    }

    /// Id of the most recent job that is still pending or running.
    pub async fn current_active_id(&self) -> Option<String> {
        let id = self.current.lock().await.clone()?;
        let job = self.get(&id)?;
        matches!(job.status, JobStatus::Pending | JobStatus::Running).then_some(id)
    }

    /// Cancel a job.  Returns false for unknown or already-terminal jobs.
    pub fn cancel(&self, id: &str) -> bool {
        match self.cancels.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Subscribe to the live event stream of a job.
    pub fn subscribe(&self, id: &str) -> Option<broadcast::Receiver<String>> {
        self.streams.get(id).map(|s| s.subscribe())
    }
}

/// Wire shape of one SSE frame.
fn event_frame(event: &AgentEvent) -> serde_json::Value {
    use serde_json::json;
    match event {
        AgentEvent::ContentDelta(t) => json!({ "type": "content", "text": t }),
        AgentEvent::ReasoningDelta(t) => json!({ "type": "reasoning", "text": t }),
        AgentEvent::ToolCallStarted(tc) => {
            json!({ "type": "tool_call", "id": tc.id, "name": tc.name })
        }
        AgentEvent::ToolCallFinished {
            call_id,
            tool_name,
            is_error,
            ..
        } => json!({
            "type": "tool_result", "id": call_id, "name": tool_name, "is_error": is_error
        }),
        AgentEvent::ToolProgress(p) => json!({
            "type": "tool_progress", "name": p.tool_name, "status": format!("{:?}", p.status)
        }),
        AgentEvent::Usage(u) => json!({ "type": "usage", "total_tokens": u.total_tokens }),
        AgentEvent::Summarised {
            tokens_before,
            tokens_after,
        } => json!({ "type": "summarised", "before": tokens_before, "after": tokens_after }),
        AgentEvent::TurnComplete => json!({ "type": "done" }),
        AgentEvent::Aborted { .. } => json!({ "type": "aborted" }),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
