// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod mock;
mod openai_compat;
mod provider;
mod types;

pub use mock::{MockProvider, ScriptedMockProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{ModelProvider, ResponseStream};
pub use types::{
    CompletionRequest, ContentPart, FunctionCall, Message, MessageContent, ResponseEvent, Role,
    StreamError, ToolSchema, Usage,
};
