// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{provider::ResponseStream, CompletionRequest, ResponseEvent, Usage};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();

        let events: Vec<anyhow::Result<ResponseEvent>> = vec![
            Ok(ResponseEvent::ContentDelta(format!("MOCK: {reply}"))),
            Ok(ResponseEvent::Usage(Usage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            })),
            Ok(ResponseEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted mock provider.  Each call to `complete` (or
/// `complete_buffered`) pops the next response script from the front of the
/// queue.  This lets tests specify exact event sequences — including
/// fragmented tool calls — without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<ResponseEvent>>>>,
    /// Every `CompletionRequest` seen by this provider, in call order.
    /// Tests inspect this to assert on what was sent.
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedMockProvider {
    /// Build a provider from a list of response scripts.
    /// The outer `Vec` is the ordered list of calls; the inner `Vec` is the
    /// sequence of [`ResponseEvent`]s emitted for that call.
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            ResponseEvent::ContentDelta(r),
            ResponseEvent::Usage(Usage {
                prompt_tokens: 5,
                completion_tokens: 5,
                total_tokens: 10,
            }),
            ResponseEvent::Done,
        ]])
    }

    /// Convenience: provider that returns a tool call followed by a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            // Round 1 – model emits a tool call
            vec![
                ResponseEvent::ToolCallStart {
                    index: 0,
                    id: tool_id.into(),
                    name: tool_name.into(),
                },
                ResponseEvent::ToolCallArgsDelta {
                    index: 0,
                    fragment: args_json.into(),
                },
                ResponseEvent::Done,
            ],
            // Round 2 – model responds after the tool result
            vec![
                ResponseEvent::ContentDelta(final_text.into()),
                ResponseEvent::Usage(Usage {
                    prompt_tokens: 20,
                    completion_tokens: 10,
                    total_tokens: 30,
                }),
                ResponseEvent::Done,
            ],
        ])
    }

    /// The last `CompletionRequest` seen, if any.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn next_script(&self) -> Vec<ResponseEvent> {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            // Default fallback when all scripts are consumed
            vec![
                ResponseEvent::ContentDelta("[no more scripts]".into()),
                ResponseEvent::Done,
            ]
        } else {
            scripts.remove(0)
        }
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        self.requests.lock().unwrap().push(req);
        let wrapped: Vec<anyhow::Result<ResponseEvent>> =
            self.next_script().into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }

    async fn complete_buffered(
        &self,
        req: CompletionRequest,
    ) -> anyhow::Result<Vec<ResponseEvent>> {
        self.requests.lock().unwrap().push(req);
        Ok(self.next_script())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
