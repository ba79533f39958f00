// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Plan persistence: one canonical JSON file per active plan, mirrored as a
//! human-readable Markdown file with the same base name.
//!
//! Every status transition saves the plan.  Writes go through a temp file
//! plus rename under an async mutex, so concurrent workers can never tear
//! the file and a crash leaves either the old or the new plan, never a mix.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::debug;

use crate::{PlanError, SubTaskStatus, TaskPlan};

pub struct PlanStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PlanStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn markdown_path(&self) -> PathBuf {
        self.path.with_extension("md")
    }

    /// Load a plan from `path`.
    ///
    /// Any subtask recorded as `in_progress` belonged to a worker that no
    /// longer exists — it is reclassified `Interrupted` so `--retry` can
    /// pick it up.
    pub fn load(path: &Path) -> Result<TaskPlan, PlanError> {
        let text = std::fs::read_to_string(path).map_err(|e| PlanError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut plan: TaskPlan =
            serde_json::from_str(&text).map_err(|e| PlanError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        plan.validate()?;
        for s in &mut plan.subtasks {
            if s.status == SubTaskStatus::InProgress {
                debug!(subtask = %s.id, "reclassifying in_progress subtask as interrupted");
                s.status = SubTaskStatus::Interrupted;
            }
        }
        Ok(plan)
    }

    /// Persist the plan atomically and rewrite the Markdown mirror.
    pub async fn save(&self, plan: &TaskPlan) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;

        let json = serde_json::to_string_pretty(plan)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        // The mirror is informational; failures must not lose the plan.
        if let Err(e) = std::fs::write(self.markdown_path(), render_markdown(plan)) {
            tracing::warn!(error = %e, "failed to write plan markdown mirror");
        }
        Ok(())
    }
}

fn status_checkbox(status: SubTaskStatus) -> &'static str {
    match status {
        SubTaskStatus::Completed => "[x]",
        _ => "[ ]",
    }
}

fn status_label(status: SubTaskStatus) -> &'static str {
    match status {
        SubTaskStatus::Pending => "pending",
        SubTaskStatus::InProgress => "in progress",
        SubTaskStatus::Completed => "completed",
        SubTaskStatus::Failed => "failed",
        SubTaskStatus::Blocked => "blocked",
        SubTaskStatus::Interrupted => "interrupted",
    }
}

/// Render the human-readable mirror.
fn render_markdown(plan: &TaskPlan) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Plan: {}\n\n", plan.summary));
    out.push_str(&format!("Task: {}\n", plan.task_id));
    out.push_str(&format!("Request: {}\n", plan.original_request));
    out.push_str(&format!(
        "Recommended agents: {}\n",
        plan.recommended_agent_count
    ));
    out.push_str(&format!("Risk: {}\n\n---\n\n", plan.risk_assessment));
    for s in &plan.subtasks {
        out.push_str(&format!(
            "- {} **{}**: {} ({}, ~{} min",
            status_checkbox(s.status),
            s.id,
            s.title,
            status_label(s.status),
            s.estimated_minutes,
        ));
        if !s.dependencies.is_empty() {
            out.push_str(&format!(", after {}", s.dependencies.join(", ")));
        }
        out.push_str(")\n");
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::{SubTask, SubTaskKind};

    use super::*;

    fn sample_plan() -> TaskPlan {
        TaskPlan {
            task_id: "t-1".into(),
            original_request: "add feature".into(),
            summary: "feature plan".into(),
            recommended_agent_count: 2,
            risk_assessment: "low".into(),
            subtasks: vec![
                SubTask {
                    id: "a".into(),
                    title: "implement".into(),
                    description: "write the code".into(),
                    kind: SubTaskKind::Code,
                    dependencies: vec![],
                    estimated_minutes: 10,
                    status: SubTaskStatus::Completed,
                    assigned_agent_id: None,
                    result_summary: Some("done".into()),
                },
                SubTask {
                    id: "b".into(),
                    title: "test".into(),
                    description: "write the tests".into(),
                    kind: SubTaskKind::Test,
                    dependencies: vec!["a".into()],
                    estimated_minutes: 5,
                    status: SubTaskStatus::InProgress,
                    assigned_agent_id: Some("agent-1".into()),
                    result_summary: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current-plan.json");
        let store = PlanStore::new(&path);
        let plan = sample_plan();

        store.save(&plan).await.unwrap();
        let loaded = PlanStore::load(&path).unwrap();

        assert_eq!(loaded.task_id, plan.task_id);
        assert_eq!(loaded.subtasks.len(), 2);
        assert_eq!(loaded.subtasks[0].status, SubTaskStatus::Completed);
    }

    #[tokio::test]
    async fn load_reclassifies_in_progress_as_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current-plan.json");
        let store = PlanStore::new(&path);
        store.save(&sample_plan()).await.unwrap();

        let loaded = PlanStore::load(&path).unwrap();
        assert_eq!(
            loaded.get("b").unwrap().status,
            SubTaskStatus::Interrupted,
            "a dead worker's subtask must be resumable"
        );
    }

    #[tokio::test]
    async fn save_writes_markdown_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current-plan.json");
        let store = PlanStore::new(&path);
        store.save(&sample_plan()).await.unwrap();

        let md = std::fs::read_to_string(dir.path().join("current-plan.md")).unwrap();
        assert!(md.contains("# Plan: feature plan"));
        assert!(md.contains("- [x] **a**"));
        assert!(md.contains("- [ ] **b**"));
        assert!(md.contains("after a"));
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = PlanStore::load(Path::new("/nonexistent/plan.json")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("/nonexistent/plan.json"));
    }

    #[test]
    fn load_corrupt_json_reports_reason() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(&path, "{ definitely not json").unwrap();
        let err = PlanStore::load(&path).unwrap_err();
        assert!(matches!(err, PlanError::Corrupt { .. }));
        assert!(err.to_string().contains("plan.json"));
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current-plan.json");
        let store = PlanStore::new(&path);
        store.save(&sample_plan()).await.unwrap();
        assert!(!dir.path().join("current-plan.json.tmp").exists());
    }
}
