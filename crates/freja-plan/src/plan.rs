// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// Errors specific to plan handling.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("dependency cycle involving subtask '{0}'")]
    Cycle(String),
    #[error("subtask '{id}' depends on unknown subtask '{dep}'")]
    UnknownDependency { id: String, dep: String },
    #[error("duplicate subtask id '{0}'")]
    DuplicateId(String),
    #[error("plan file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("decomposer returned invalid JSON after repair retry: {0}")]
    InvalidDecomposition(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
    /// Was `InProgress` when the process died; reclassified on resume.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskKind {
    Code,
    Test,
    Research,
    Refactor,
    Docs,
}

/// One node of the plan DAG.  Dependencies reference other subtasks by id
/// only — the plan owns the arena, nodes never own each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: SubTaskKind,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub estimated_minutes: u32,
    #[serde(default)]
    pub status: SubTaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,
    /// The worker's final answer, stored when the subtask finishes and fed
    /// into the prompts of dependent subtasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
}

/// A decomposed task: subtask arena plus metadata.  Persisted as one
/// canonical JSON file per active plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub task_id: String,
    pub original_request: String,
    pub summary: String,
    pub recommended_agent_count: usize,
    pub risk_assessment: String,
    pub subtasks: Vec<SubTask>,
}

impl TaskPlan {
    pub fn get(&self, id: &str) -> Option<&SubTask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SubTask> {
        self.subtasks.iter_mut().find(|s| s.id == id)
    }

    /// Check structural soundness: unique ids, known dependency references,
    /// and an acyclic dependency graph.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut seen = HashSet::new();
        for s in &self.subtasks {
            if !seen.insert(s.id.as_str()) {
                return Err(PlanError::DuplicateId(s.id.clone()));
            }
        }
        for s in &self.subtasks {
            for dep in &s.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        id: s.id.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }

        // Kahn's algorithm: if a topological order does not cover every
        // node, the remainder contains a cycle.
        let mut indegree: HashMap<&str, usize> = self
            .subtasks
            .iter()
            .map(|s| (s.id.as_str(), s.dependencies.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for s in &self.subtasks {
            for dep in &s.dependencies {
                dependents.entry(dep.as_str()).or_default().push(s.id.as_str());
            }
        }
        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for next in dependents.get(id).into_iter().flatten() {
                let d = indegree.get_mut(next).expect("known id");
                *d -= 1;
                if *d == 0 {
                    queue.push_back(next);
                }
            }
        }
        if visited != self.subtasks.len() {
            let cyclic = self
                .subtasks
                .iter()
                .find(|s| indegree[s.id.as_str()] > 0)
                .map(|s| s.id.clone())
                .unwrap_or_default();
            return Err(PlanError::Cycle(cyclic));
        }
        Ok(())
    }

    /// Number of subtasks that directly depend on `id`.
    pub fn dependent_count(&self, id: &str) -> usize {
        self.subtasks
            .iter()
            .filter(|s| s.dependencies.iter().any(|d| d == id))
            .count()
    }

    /// Ids of subtasks eligible to run: `Pending`, with every dependency
    /// `Completed` (or `Failed` as well, when `skip_failed_deps`).
    ///
    /// Ordered by scheduling priority: fewest dependents first, then plan
    /// (FIFO) order.
    pub fn ready_ids(&self, skip_failed_deps: bool) -> Vec<String> {
        let satisfied = |dep: &str| -> bool {
            match self.get(dep).map(|s| s.status) {
                Some(SubTaskStatus::Completed) => true,
                Some(SubTaskStatus::Failed) => skip_failed_deps,
                _ => false,
            }
        };
        let mut ready: Vec<(usize, usize, String)> = self
            .subtasks
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == SubTaskStatus::Pending)
            .filter(|(_, s)| s.dependencies.iter().all(|d| satisfied(d)))
            .map(|(pos, s)| (self.dependent_count(&s.id), pos, s.id.clone()))
            .collect();
        ready.sort();
        ready.into_iter().map(|(_, _, id)| id).collect()
    }

    /// True when every subtask completed successfully.
    pub fn all_completed(&self) -> bool {
        self.subtasks
            .iter()
            .all(|s| s.status == SubTaskStatus::Completed)
    }

    /// Mark every `Pending` subtask that transitively depends on `failed_id`
    /// as `Blocked`.
    pub fn block_downstream(&mut self, failed_id: &str) {
        let mut frontier: VecDeque<String> = VecDeque::from([failed_id.to_string()]);
        let mut affected: HashSet<String> = HashSet::new();
        while let Some(id) = frontier.pop_front() {
            for s in &self.subtasks {
                if s.dependencies.iter().any(|d| *d == id) && affected.insert(s.id.clone()) {
                    frontier.push_back(s.id.clone());
                }
            }
        }
        for s in &mut self.subtasks {
            if affected.contains(&s.id) && s.status == SubTaskStatus::Pending {
                s.status = SubTaskStatus::Blocked;
            }
        }
    }
}

/// `--reset`: every subtask back to `Pending`.
pub fn reset_all(plan: &mut TaskPlan) {
    for s in &mut plan.subtasks {
        s.status = SubTaskStatus::Pending;
        s.assigned_agent_id = None;
        s.result_summary = None;
    }
}

/// `--retry`: `Failed`, `Blocked`, and `Interrupted` subtasks back to
/// `Pending`; `Completed` work is left untouched.
pub fn retry_unfinished(plan: &mut TaskPlan) {
    for s in &mut plan.subtasks {
        if matches!(
            s.status,
            SubTaskStatus::Failed | SubTaskStatus::Blocked | SubTaskStatus::Interrupted
        ) {
            s.status = SubTaskStatus::Pending;
            s.assigned_agent_id = None;
            s.result_summary = None;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
