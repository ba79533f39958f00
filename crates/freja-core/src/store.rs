// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only per-session log: one JSON record per line, one file per
//! session.  Replaying the file reconstructs the in-memory message list;
//! a `summary` record collapses all history recorded before it, mirroring
//! what the live summariser did to the session.
//!
//! Large tool results are truncated at write time (the live session keeps
//! the full value) — storage truncation is a sink-specific concern and
//! never affects what the model sees.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use freja_model::{Message, Usage};

use crate::summarize::{summary_ack_message, summary_user_message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    User,
    Assistant,
    ToolCall,
    ToolResult,
    Summary,
}

/// One line of the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRecord {
    pub start_time: DateTime<Utc>,
    pub kind: RecordKind,
    /// For `tool_call` and `tool_result` this is a JSON object string
    /// carrying `tool_call_id` plus the arguments or result; for the other
    /// kinds it is the plain message text.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

/// Append-only writer for one session's log file.
pub struct SessionStore {
    path: PathBuf,
    tool_result_cap_bytes: usize,
}

impl SessionStore {
    /// Open (or create) the log for `session_id` under `dir`.
    pub fn open(
        dir: &Path,
        session_id: &str,
        tool_result_cap_bytes: usize,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating session store dir {}", dir.display()))?;
        Ok(Self {
            path: dir.join(format!("{session_id}.jsonl")),
            tool_result_cap_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &StoreRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to {}", self.path.display()))?;
        Ok(())
    }

    pub fn record_user(&self, text: &str) -> anyhow::Result<()> {
        self.append(&StoreRecord {
            start_time: Utc::now(),
            kind: RecordKind::User,
            content: text.to_string(),
            token_usage: None,
            tool_name: None,
        })
    }

    pub fn record_assistant(&self, text: &str, usage: Option<Usage>) -> anyhow::Result<()> {
        self.append(&StoreRecord {
            start_time: Utc::now(),
            kind: RecordKind::Assistant,
            content: text.to_string(),
            token_usage: usage,
            tool_name: None,
        })
    }

    pub fn record_tool_call(
        &self,
        call_id: &str,
        tool_name: &str,
        arguments: &str,
    ) -> anyhow::Result<()> {
        let content = json!({ "tool_call_id": call_id, "arguments": arguments }).to_string();
        self.append(&StoreRecord {
            start_time: Utc::now(),
            kind: RecordKind::ToolCall,
            content,
            token_usage: None,
            tool_name: Some(tool_name.to_string()),
        })
    }

    pub fn record_tool_result(
        &self,
        call_id: &str,
        tool_name: &str,
        result_json: &str,
    ) -> anyhow::Result<()> {
        let truncated = truncate_utf8(result_json, self.tool_result_cap_bytes);
        let content = json!({ "tool_call_id": call_id, "result": truncated }).to_string();
        self.append(&StoreRecord {
            start_time: Utc::now(),
            kind: RecordKind::ToolResult,
            content,
            token_usage: None,
            tool_name: Some(tool_name.to_string()),
        })
    }

    pub fn record_summary(&self, summary: &str) -> anyhow::Result<()> {
        self.append(&StoreRecord {
            start_time: Utc::now(),
            kind: RecordKind::Summary,
            content: summary.to_string(),
            token_usage: None,
            tool_name: None,
        })
    }

    /// Reconstruct the non-system message list by replaying the log.
    ///
    /// A `summary` record replaces everything recorded before it with the
    /// same synthetic summary/acknowledgement pair the live summariser
    /// installs.  The caller prepends its own system message.
    pub fn replay(path: &Path) -> anyhow::Result<Vec<Message>> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut messages: Vec<Message> = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: StoreRecord = serde_json::from_str(line)
                .with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
            match record.kind {
                RecordKind::User => messages.push(Message::user(record.content)),
                RecordKind::Assistant => messages.push(Message::assistant(record.content)),
                RecordKind::ToolCall => {
                    let v: serde_json::Value = serde_json::from_str(&record.content)
                        .with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
                    messages.push(Message::tool_call(
                        v["tool_call_id"].as_str().unwrap_or_default(),
                        record.tool_name.as_deref().unwrap_or_default(),
                        v["arguments"].as_str().unwrap_or_default(),
                    ));
                }
                RecordKind::ToolResult => {
                    let v: serde_json::Value = serde_json::from_str(&record.content)
                        .with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
                    messages.push(Message::tool_result(
                        v["tool_call_id"].as_str().unwrap_or_default(),
                        v["result"].as_str().unwrap_or_default(),
                    ));
                }
                RecordKind::Summary => {
                    messages.clear();
                    messages.push(summary_user_message(&record.content));
                    messages.push(summary_ack_message());
                }
            }
        }
        Ok(messages)
    }
}

/// Truncate to at most `cap` bytes on a char boundary.
fn truncate_utf8(s: &str, cap: usize) -> String {
    if cap == 0 || s.len() <= cap {
        return s.to_string();
    }
    let mut end = cap;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…[truncated {} bytes]", &s[..end], s.len() - end)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
