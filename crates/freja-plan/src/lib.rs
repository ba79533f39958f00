// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod decompose;
mod orchestrator;
mod persist;
mod plan;

pub use decompose::decompose;
pub use orchestrator::{
    AgentWorkerRunner, OrchestrationReport, Orchestrator, OrchestratorOptions, TaggedEvent,
    WorkerRunner,
};
pub use persist::PlanStore;
pub use plan::{
    reset_all, retry_unfinished, PlanError, SubTask, SubTaskKind, SubTaskStatus, TaskPlan,
};
