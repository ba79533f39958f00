// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod dispatcher;
pub mod events;
pub mod permission;
pub mod registry;
pub mod tool;

pub use dispatcher::Dispatcher;
pub use events::{ToolProgress, ToolStatus};
pub use permission::{
    with_sandbox_scope, PermissionArbiter, PermissionPrompt, PromptOutcome,
};
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{RiskLevel, Tool, ToolCall};

pub use builtin::read_file::ReadFileTool;
pub use builtin::run_process::RunProcessTool;
pub use builtin::write_file::WriteFileTool;
