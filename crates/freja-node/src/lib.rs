// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod auth;
mod client;
mod jobs;
mod server;
mod tools;

pub use auth::TokenGuard;
pub use client::{AgentInfo, PeerClient};
pub use jobs::{AgentJobExecutor, Job, JobExecutor, JobService, JobStatus};
pub use server::{router, serve};
pub use tools::{
    AgentCancelTool, AgentListTool, AgentResultTool, AgentStatusTool, AgentSubmitTool, PeerRoster,
};
