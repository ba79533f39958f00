// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

use crate::{CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Perform a single blocking completion and return the full event set in
    /// one batch.
    ///
    /// Semantically equivalent to a stream with no intermediate
    /// `ContentDelta` emissions.  The default implementation drives
    /// [`complete`](Self::complete) and collects; drivers with a native
    /// non-streaming request path should override it.
    async fn complete_buffered(
        &self,
        mut req: CompletionRequest,
    ) -> anyhow::Result<Vec<ResponseEvent>> {
        req.stream = false;
        let mut stream = self.complete(req).await?;
        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            events.push(ev?);
        }
        Ok(events)
    }

    /// Query the endpoint for the actual context window of this model.
    ///
    /// Returns `Some(tokens)` when the probe succeeds, `None` otherwise.
    /// Absence is non-fatal — callers fall back to the configured value.
    async fn probe_context_window(&self) -> Option<u32> {
        None
    }
}
