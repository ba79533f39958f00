// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{RiskLevel, Tool, ToolCall};

/// Reads a file from the workspace, optionally a line window of it.
#[derive(Default)]
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Use offset and limit to read a window of a large file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": { "type": "string", "description": "File path to read" },
                "offset": {
                    "type": "integer",
                    "description": "First line to return (0-based, default 0)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return"
                }
            }
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::ReadOnly
    }

    async fn execute(&self, call: &ToolCall) -> anyhow::Result<Value> {
        let path = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter: path"))?;

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("cannot read {path}: {e}"))?;

        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).map(|l| l as usize);

        let total_lines = text.lines().count();
        let content: String = match limit {
            Some(l) => text
                .lines()
                .skip(offset)
                .take(l)
                .collect::<Vec<_>>()
                .join("\n"),
            None if offset > 0 => text.lines().skip(offset).collect::<Vec<_>>().join("\n"),
            None => text,
        };

        Ok(json!({
            "path": path,
            "content": content,
            "total_lines": total_lines,
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "t".into(),
            name: "read_file".into(),
            args,
        }
    }

    #[tokio::test]
    async fn reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.txt");
        std::fs::write(&p, "one\ntwo\nthree\n").unwrap();
        let out = ReadFileTool.execute(&call(json!({ "path": p }))).await.unwrap();
        assert_eq!(out["content"], "one\ntwo\nthree\n");
        assert_eq!(out["total_lines"], 3);
    }

    #[tokio::test]
    async fn offset_and_limit_select_a_window() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.txt");
        std::fs::write(&p, "l0\nl1\nl2\nl3\n").unwrap();
        let out = ReadFileTool
            .execute(&call(json!({ "path": p, "offset": 1, "limit": 2 })))
            .await
            .unwrap();
        assert_eq!(out["content"], "l1\nl2");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let res = ReadFileTool
            .execute(&call(json!({ "path": "/nonexistent/file.txt" })))
            .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn missing_path_is_an_error() {
        assert!(ReadFileTool.execute(&call(json!({}))).await.is_err());
    }

    #[test]
    fn is_read_only() {
        assert_eq!(ReadFileTool.risk_level(), RiskLevel::ReadOnly);
    }
}
