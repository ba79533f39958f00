// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "freja",
    about = "A local-first, tool-using AI coding agent",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Task or question for a one-shot agent run
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Path to an explicit config file (merged over the discovered layers)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Model id override, e.g. "qwen2.5-coder"
    #[arg(long, short = 'm', env = "FREJA_MODEL")]
    pub model: Option<String>,

    /// Endpoint override, e.g. "http://localhost:1234"
    #[arg(long, env = "FREJA_HOST")]
    pub host: Option<String>,

    /// Approve every tool call without prompting (headless use)
    #[arg(long)]
    pub auto_approve: bool,

    /// Verbose logging to stderr (RUST_LOG overrides)
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decompose a task into subtasks and run them with parallel workers.
    ///
    /// Without TASK, resumes the persisted plan file.  Progress is printed
    /// per worker; the plan (JSON + Markdown mirror) is updated after every
    /// status change, so an interrupted run can be resumed with --retry.
    Orchestrate {
        /// The task to decompose.  Omit to resume an existing plan.
        task: Option<String>,

        /// Maximum concurrent workers (1-8); defaults from config
        #[arg(long)]
        max_agents: Option<usize>,

        /// Reset every subtask to pending before running
        #[arg(long)]
        reset: bool,

        /// Reset failed, blocked, and interrupted subtasks to pending
        #[arg(long)]
        retry: bool,

        /// Run subtasks even when their dependencies failed
        #[arg(long)]
        skip: bool,

        /// Plan file location; defaults from config
        #[arg(long)]
        plan_file: Option<PathBuf>,
    },

    /// Serve the inter-agent job API (POST /api/jobs etc.).
    ///
    /// Peers listed in the config can then delegate work to this agent via
    /// their agent_submit tool.
    Serve,

    /// Print the merged configuration and exit.
    ShowConfig,
}
