// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use freja_config::AgentConfig;
use freja_model::{CompletionRequest, Message, ModelProvider, ResponseEvent, StreamError};
use freja_tools::{Dispatcher, ToolCall};

use crate::{
    prompts::system_prompt, store::SessionStore, summarize::maybe_summarise, AgentEvent, Session,
};

/// What one submitted turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The final assistant content.  The caller appends it to the session
    /// (via [`Agent::append_assistant`]) — the loop itself does not.
    pub content: String,
    /// Set when the loop hit the configured round cap; `content` is then
    /// the last partial text rather than a clean final answer.
    pub max_iterations_reached: bool,
}

/// The core agent: owns a session and drives the completion / tool-call /
/// final-answer state machine.
pub struct Agent {
    session: Session,
    model: Arc<dyn ModelProvider>,
    dispatcher: Arc<Dispatcher>,
    config: Arc<AgentConfig>,
    store: Option<SessionStore>,
}

/// A tool call under assembly, keyed by the provider's parallel-call index.
#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

/// A fully assembled call: the raw argument string goes into the session
/// message, the parsed value into the dispatcher.
struct AssembledCall {
    id: String,
    name: String,
    raw_args: String,
    args: serde_json::Value,
}

impl Agent {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        dispatcher: Arc<Dispatcher>,
        config: Arc<AgentConfig>,
        max_context_tokens: usize,
    ) -> Self {
        Self {
            session: Session::new(max_context_tokens),
            model,
            dispatcher,
            config,
            store: None,
        }
    }

    /// Attach a session store; every message and tool event from now on is
    /// journalled.
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Append the final assistant content produced by a completed turn.
    /// Callers do this once they have consumed [`TurnOutcome::content`].
    pub fn append_assistant(&mut self, text: &str) {
        self.session.push(Message::assistant(text));
        if let Some(store) = &self.store {
            if let Err(e) = store.record_assistant(text, None) {
                warn!(error = %e, "failed to journal assistant message");
            }
        }
    }

    /// Push a user message and run the agent loop until a final answer, the
    /// round cap, cancellation, or a transport error.
    ///
    /// Events stream through `tx` as they happen; the caller drops the
    /// receiver when it is no longer interested.
    pub async fn submit(
        &mut self,
        user_input: &str,
        tx: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<TurnOutcome> {
        if cancel.is_cancelled() {
            let _ = tx
                .send(AgentEvent::Aborted {
                    partial_text: String::new(),
                })
                .await;
            return Err(StreamError::Cancelled.into());
        }

        // Proactive budget gate, before the new user message is pushed so
        // the question itself is never summarised away.  Summarisation only
        // ever runs between completions.
        maybe_summarise(
            &mut self.session,
            self.model.as_ref(),
            &self.config,
            self.store.as_ref(),
            &tx,
        )
        .await?;

        if self.session.messages.is_empty() {
            self.session
                .push(Message::system(system_prompt(self.config.system_prompt.as_deref())));
        }

        self.session.push(Message::user(user_input));
        if let Some(store) = &self.store {
            if let Err(e) = store.record_user(user_input) {
                warn!(error = %e, "failed to journal user message");
            }
        }

        self.run_loop(tx, cancel).await
    }

    /// The main loop: model call → optional tool calls → repeat.
    async fn run_loop(
        &mut self,
        tx: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<TurnOutcome> {
        let mut rounds = 0u32;
        let mut partial_text = String::new();
        let mut empty_turn_retries = 0u32;
        const MAX_EMPTY_TURN_RETRIES: u32 = 2;

        loop {
            if cancel.is_cancelled() {
                let _ = tx
                    .send(AgentEvent::Aborted {
                        partial_text: partial_text.clone(),
                    })
                    .await;
                return Err(StreamError::Cancelled.into());
            }

            rounds += 1;
            if rounds > self.config.max_iterations {
                warn!(
                    max_iterations = self.config.max_iterations,
                    "round cap reached; returning last partial content"
                );
                let _ = tx.send(AgentEvent::TurnComplete).await;
                return Ok(TurnOutcome {
                    content: partial_text,
                    max_iterations_reached: true,
                });
            }

            let turn = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = stream_one_turn(
                    self.model.clone(),
                    &mut self.session,
                    &self.dispatcher,
                    &tx,
                ) => Some(result),
            };

            let (text, calls) = match turn {
                None => {
                    // Aborted mid-stream: the partial assistant message is
                    // discarded — nothing was appended to the session.
                    let _ = tx
                        .send(AgentEvent::Aborted {
                            partial_text: partial_text.clone(),
                        })
                        .await;
                    return Err(StreamError::Cancelled.into());
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(t)) => t,
            };

            if calls.is_empty() {
                if text.is_empty() && empty_turn_retries < MAX_EMPTY_TURN_RETRIES {
                    // Some models produce a reasoning block and then stop.
                    empty_turn_retries += 1;
                    self.session.push(Message::user(
                        "You produced no response or tool call. \
                         Please continue with your next action.",
                    ));
                    continue;
                }
                // Tool-call markup written into the text stream instead of
                // the structured protocol wastes the turn; push a correction
                // so the model retries in the right format.
                if text_contains_malformed_tool_call(&text)
                    && empty_turn_retries < MAX_EMPTY_TURN_RETRIES
                {
                    empty_turn_retries += 1;
                    self.session.push(Message::assistant(&text));
                    self.session.push(Message::user(
                        "You wrote a tool call as XML/function tags in your text \
                         response. Do not include tool calls in your text. \
                         Use the structured tool-call protocol instead.",
                    ));
                    continue;
                }
                // Final answer.  The caller appends it to the session.
                let _ = tx.send(AgentEvent::TurnComplete).await;
                return Ok(TurnOutcome {
                    content: text,
                    max_iterations_reached: false,
                });
            }

            empty_turn_retries = 0;

            // Preamble text stays in the session ahead of the tool calls.
            if !text.is_empty() {
                partial_text.push_str(&text);
                self.session.push(Message::assistant(&text));
            }

            // Phase 1: append every tool-call request, in request order,
            // before any result (the wire format requires the full set on
            // one assistant turn).
            for call in &calls {
                self.session
                    .push(Message::tool_call(&call.id, &call.name, &call.raw_args));
                if let Some(store) = &self.store {
                    if let Err(e) = store.record_tool_call(&call.id, &call.name, &call.raw_args) {
                        warn!(error = %e, "failed to journal tool call");
                    }
                }
            }

            // Phase 2: execute strictly sequentially in request order — the
            // model's request order is a contract, and each result is
            // appended before the next call runs.
            for call in &calls {
                let tool_call = ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                };
                let _ = tx.send(AgentEvent::ToolCallStarted(tool_call.clone())).await;

                let started = Instant::now();
                let result = self.dispatcher.execute(&tool_call, &cancel).await;
                let is_error = result.get("error").is_some();
                let result_json = result.to_string();

                let _ = tx
                    .send(AgentEvent::ToolCallFinished {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        result: result.clone(),
                        elapsed: started.elapsed(),
                        is_error,
                    })
                    .await;

                self.session.push(Message::tool_result(&call.id, &result_json));
                if let Some(store) = &self.store {
                    if let Err(e) = store.record_tool_result(&call.id, &call.name, &result_json) {
                        warn!(error = %e, "failed to journal tool result");
                    }
                }
            }

            // Mid-loop budget gate: a batch of large tool results can push
            // the session over the threshold between completions.
            maybe_summarise(
                &mut self.session,
                self.model.as_ref(),
                &self.config,
                self.store.as_ref(),
                &tx,
            )
            .await?;
        }
    }
}

/// Return true when `text` contains tool-call markup the model wrote into
/// the text stream instead of using the structured protocol.  Some
/// fine-tuned models occasionally fall back to XML-style or Hermes-style
/// function-call syntax.
fn text_contains_malformed_tool_call(text: &str) -> bool {
    text.contains("<tool_call>")
        || text.contains("</tool_call>")
        || text.contains("<function=")
        || text.contains("[TOOL_CALL]")
}

/// Drive one completion: relay deltas to observers, record usage, and
/// assemble fragmented tool calls.  Returns the accumulated text and the
/// assembled calls in index order.
async fn stream_one_turn(
    model: Arc<dyn ModelProvider>,
    session: &mut Session,
    dispatcher: &Dispatcher,
    tx: &mpsc::Sender<AgentEvent>,
) -> anyhow::Result<(String, Vec<AssembledCall>)> {
    let tools: Vec<freja_model::ToolSchema> = dispatcher
        .registry()
        .schemas()
        .into_iter()
        .map(|s| freja_model::ToolSchema {
            name: s.name,
            description: s.description,
            parameters: s.parameters,
        })
        .collect();

    let req = CompletionRequest {
        messages: session.messages.clone(),
        tools,
        stream: true,
    };

    let mut stream = model
        .complete(req)
        .await
        .context("model completion failed")?;

    let mut text = String::new();
    // Keyed by the parallel-tool-call index from the provider.  Indices can
    // interleave; any given index receives id/name once and argument
    // fragments as often as the server splits them.
    let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();
    let mut saw_done = false;

    while let Some(event) = stream.next().await {
        match event? {
            ResponseEvent::ContentDelta(delta) => {
                text.push_str(&delta);
                let _ = tx.send(AgentEvent::ContentDelta(delta)).await;
            }
            ResponseEvent::ReasoningDelta(delta) => {
                let _ = tx.send(AgentEvent::ReasoningDelta(delta)).await;
            }
            ResponseEvent::ToolCallStart { index, id, name } => {
                let entry = pending.entry(index).or_default();
                if !id.is_empty() {
                    entry.id = id;
                }
                if !name.is_empty() {
                    entry.name = name;
                }
            }
            ResponseEvent::ToolCallArgsDelta { index, fragment } => {
                pending.entry(index).or_default().args_buf.push_str(&fragment);
            }
            ResponseEvent::Usage(usage) => {
                session.tracker.observe(&usage);
                let _ = tx.send(AgentEvent::Usage(usage)).await;
            }
            ResponseEvent::Done => {
                saw_done = true;
                break;
            }
        }
    }

    if !saw_done && !pending.is_empty() {
        // Callers may still treat accumulated content as the final answer
        // when no tool calls were signalled; with partial tool calls the
        // turn is unrecoverable.
        return Err(
            StreamError::Transport("stream closed before [DONE] with partial tool calls".into())
                .into(),
        );
    }

    // Flush assembled calls in index order.  An empty name cannot be
    // dispatched and is dropped; an empty id gets a synthetic one so the
    // subsequent tool message can reference it.
    let mut sorted: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
    sorted.sort_by_key(|(idx, _)| *idx);

    let mut calls = Vec::with_capacity(sorted.len());
    for (i, (_, p)) in sorted.into_iter().enumerate() {
        if p.name.is_empty() {
            warn!(tool_call_id = %p.id, "dropping tool call with empty name");
            continue;
        }
        let id = if p.id.is_empty() {
            let synth = format!("call_synth_{i}");
            debug!(tool_name = %p.name, id = %synth, "synthesised missing tool-call id");
            synth
        } else {
            p.id
        };
        let raw_args = if p.args_buf.is_empty() {
            "{}".to_string()
        } else {
            p.args_buf
        };
        let args: serde_json::Value = match serde_json::from_str(&raw_args) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    tool_name = %p.name,
                    error = %e,
                    "tool call arguments are not valid JSON; substituting {{}}"
                );
                serde_json::Value::Object(Default::default())
            }
        };
        calls.push(AssembledCall {
            id,
            name: p.name,
            raw_args,
            args,
        });
    }

    Ok((text, calls))
}
