// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::{RiskLevel, Tool, ToolCall};

/// Runs a child process and captures its output.
///
/// The conventional process envelope is `{exit_code, stdout, stderr}`;
/// timeouts are handled by the dispatcher, which reports
/// `{"error": …, "timed_out": true}` instead.
#[derive(Default)]
pub struct RunProcessTool;

#[async_trait]
impl Tool for RunProcessTool {
    fn name(&self) -> &str {
        "run_process"
    }

    fn description(&self) -> &str {
        "Run a command with arguments and return its exit code, stdout, and stderr. \
         Use the optional timeout_secs argument for commands that may run long."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["cmd"],
            "properties": {
                "cmd": {
                    "type": "string",
                    "description": "Executable to run (resolved via PATH)"
                },
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Arguments passed to the command"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory (defaults to the agent's)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Override the default execution timeout"
                }
            }
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Write
    }

    async fn execute(&self, call: &ToolCall) -> anyhow::Result<Value> {
        let cmd = call
            .args
            .get("cmd")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter: cmd"))?;
        let args: Vec<String> = call
            .args
            .get("args")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mut command = Command::new(cmd);
        command.args(&args).kill_on_drop(true);
        if let Some(cwd) = call.args.get("cwd").and_then(|v| v.as_str()) {
            command.current_dir(cwd);
        }

        let output = command
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("failed to spawn {cmd}: {e}"))?;

        Ok(json!({
            // -1 when the child was killed by a signal and has no exit code.
            "exit_code": output.status.code().unwrap_or(-1),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
