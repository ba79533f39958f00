// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool execution wrapper: permission gating, timeout, cancellation, and
//! progress reporting around the raw [`Tool::execute`](crate::Tool::execute)
//! call.
//!
//! The dispatcher never panics the loop on a tool fault — every failure mode
//! is shaped into a JSON error envelope that the model sees as data:
//!
//! | condition           | result                                            |
//! |---------------------|---------------------------------------------------|
//! | unknown tool        | `{"error": "Unknown tool: <name>"}`               |
//! | permission denied   | `{"error": "Permission denied by user"}`          |
//! | tool error          | `{"error": <message>}`                            |
//! | timeout             | `{"error": …, "timed_out": true}`                 |
//! | cancelled           | `{"error": "cancelled"}`                          |

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use freja_config::ToolsConfig;

use crate::{PermissionArbiter, ToolCall, ToolProgress, ToolRegistry, ToolStatus};

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    arbiter: Arc<PermissionArbiter>,
    default_timeout: Duration,
    heartbeat: Duration,
    progress: Option<mpsc::Sender<ToolProgress>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        arbiter: Arc<PermissionArbiter>,
        default_timeout: Duration,
        heartbeat: Duration,
    ) -> Self {
        Self {
            registry,
            arbiter,
            default_timeout,
            heartbeat,
            progress: None,
        }
    }

    pub fn from_config(
        registry: Arc<ToolRegistry>,
        arbiter: Arc<PermissionArbiter>,
        cfg: &ToolsConfig,
    ) -> Self {
        Self::new(
            registry,
            arbiter,
            Duration::from_secs(cfg.default_timeout_secs),
            Duration::from_secs(cfg.heartbeat_secs),
        )
    }

    /// Attach a progress sink.  Events are emitted when the invocation is
    /// accepted, on every heartbeat while the tool runs, and once with the
    /// terminal status.
    pub fn with_progress(mut self, tx: mpsc::Sender<ToolProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    async fn emit(
        &self,
        status: ToolStatus,
        tool_name: &str,
        started: Instant,
        message: Option<String>,
    ) {
        if let Some(tx) = &self.progress {
            let _ = tx
                .send(ToolProgress {
                    status,
                    tool_name: tool_name.to_string(),
                    elapsed: started.elapsed(),
                    message,
                })
                .await;
        }
    }

    /// Execute one tool call and return its JSON result object.
    ///
    /// Calls within one assistant turn are executed strictly sequentially in
    /// request order by the agent loop; this function handles exactly one.
    pub async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> Value {
        let started = Instant::now();

        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool = %call.name, "model requested unknown tool");
            return json!({ "error": format!("Unknown tool: {}", call.name) });
        };

        self.emit(ToolStatus::Pending, &call.name, started, None).await;

        // The permission prompt is itself a suspension point: cancellation
        // must abort a call that is waiting on the user.
        let allowed = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.emit(ToolStatus::Cancelled, &call.name, started, None).await;
                return json!({ "error": "cancelled" });
            }
            allowed = self.arbiter.check(&call.name, tool.risk_level(), &call.args) => allowed,
        };
        if !allowed {
            debug!(tool = %call.name, "permission denied");
            self.emit(
                ToolStatus::Failed,
                &call.name,
                started,
                Some("permission denied".into()),
            )
            .await;
            return json!({ "error": "Permission denied by user" });
        }

        // Per-tool default, overridable by the call's own argument block.
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        self.emit(ToolStatus::Running, &call.name, started, None).await;

        let mut exec = Box::pin(tool.execute(call));
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(self.heartbeat);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.emit(ToolStatus::Cancelled, &call.name, started, None).await;
                    return json!({ "error": "cancelled" });
                }
                _ = &mut deadline => {
                    warn!(tool = %call.name, timeout_secs = timeout.as_secs(), "tool timed out");
                    self.emit(ToolStatus::TimedOut, &call.name, started, None).await;
                    return json!({
                        "error": format!("tool timed out after {}s", timeout.as_secs()),
                        "timed_out": true,
                    });
                }
                result = &mut exec => {
                    return match result {
                        Ok(value) => {
                            self.emit(ToolStatus::Completed, &call.name, started, None).await;
                            // The tool-result envelope is always a JSON object.
                            if value.is_object() {
                                value
                            } else {
                                json!({ "result": value })
                            }
                        }
                        Err(e) => {
                            debug!(tool = %call.name, error = %e, "tool failed");
                            self.emit(
                                ToolStatus::Failed,
                                &call.name,
                                started,
                                Some(e.to_string()),
                            )
                            .await;
                            json!({ "error": e.to_string() })
                        }
                    };
                }
                _ = ticker.tick() => {
                    self.emit(ToolStatus::Running, &call.name, started, None).await;
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
