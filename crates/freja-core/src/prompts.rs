// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are freja, a software engineering agent working in the user's repository. \
You solve tasks by reading code, running commands, and editing files through \
the tools provided. Work in small verifiable steps: inspect before you change, \
run the relevant checks after you change. When a tool fails, read its error \
and adjust rather than repeating the same call. Answer in plain text when the \
task is done; do not call tools you do not need.";

/// Build the system message text.  A custom prompt replaces the default
/// wholesale; per-worker prompts (orchestration) arrive through `custom`.
pub fn system_prompt(custom: Option<&str>) -> String {
    match custom {
        Some(text) => text.to_string(),
        None => DEFAULT_SYSTEM_PROMPT.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
