// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Automatic context summarisation.
//!
//! When the token tracker crosses the configured threshold, the agent loop
//! calls [`maybe_summarise`] *before* issuing the next completion — the
//! summarisation request therefore never interleaves with an active
//! completion on the same session.  On success the session history is
//! replaced atomically by three messages: the original system message, a
//! synthetic user message carrying the delimited summary, and a synthetic
//! assistant acknowledgement.  On any failure the session is left untouched.

use tokio::sync::mpsc;
use tracing::{info, warn};

use freja_config::AgentConfig;
use freja_model::{
    CompletionRequest, Message, MessageContent, ModelProvider, ResponseEvent, Role,
};

use crate::{
    session::estimate_tokens,
    store::SessionStore,
    AgentEvent, Session,
};

const SUMMARISE_SYSTEM_PROMPT: &str = "\
You are a context compaction assistant for a software engineering agent. \
Summarise the conversation history you are given in a concise, \
information-dense way. Preserve the task state, recent decisions, open \
issues, and the most recent file and tool references verbatim where they \
matter. The summary will replace the original history to free up context \
space, so anything you omit is gone.";

const SUMMARY_ACK: &str =
    "Understood. I have the conversation summary and will continue from that state.";

/// Wrap a summary in the delimiters the rest of the system recognises.
pub(crate) fn summary_user_message(summary: &str) -> Message {
    Message::user(format!("[CONVERSATION SUMMARY\n{summary}\nEND SUMMARY]"))
}

pub(crate) fn summary_ack_message() -> Message {
    Message::assistant(SUMMARY_ACK)
}

/// Check the threshold and summarise if needed.  Failures are logged and
/// swallowed — a failed summarisation must never break the turn.
pub(crate) async fn maybe_summarise(
    session: &mut Session,
    model: &dyn ModelProvider,
    config: &AgentConfig,
    store: Option<&SessionStore>,
    tx: &mpsc::Sender<AgentEvent>,
) -> anyhow::Result<()> {
    if session.tracker.usage_fraction() < config.auto_summarise_threshold {
        return Ok(());
    }
    if session.non_system_count() <= config.min_exchanges_before_summarise {
        return Ok(());
    }

    let tokens_before = session.tracker.current_tokens();
    let history_text = serialize_history(&session.messages);

    // A dedicated summarisation conversation; the session itself is not
    // touched until we have a summary in hand.  No tools are offered.
    let req = CompletionRequest {
        messages: vec![
            Message::system(SUMMARISE_SYSTEM_PROMPT),
            Message::user(history_text),
        ],
        tools: vec![],
        stream: false,
    };

    let events = match model.complete_buffered(req).await {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "summarisation completion failed; leaving session untouched");
            return Ok(());
        }
    };
    let mut summary = String::new();
    for ev in events {
        if let ResponseEvent::ContentDelta(text) = ev {
            summary.push_str(&text);
        }
    }
    if summary.trim().is_empty() {
        warn!("summarisation returned empty text; leaving session untouched");
        return Ok(());
    }

    let system = session
        .messages
        .iter()
        .find(|m| m.role == Role::System)
        .cloned();
    let mut replacement = Vec::with_capacity(3);
    if let Some(sys) = system {
        replacement.push(sys);
    }
    replacement.push(summary_user_message(summary.trim()));
    replacement.push(summary_ack_message());

    session.replace_messages(replacement);
    session.tracker.reset(estimate_tokens(&session.messages));

    if let Some(store) = store {
        if let Err(e) = store.record_summary(summary.trim()) {
            warn!(error = %e, "failed to persist summary record");
        }
    }

    info!(
        tokens_before,
        tokens_after = session.tracker.current_tokens(),
        "session summarised"
    );
    let _ = tx
        .send(AgentEvent::Summarised {
            tokens_before,
            tokens_after: session.tracker.current_tokens(),
        })
        .await;

    Ok(())
}

/// Serialise a message list into plain text for the summarisation prompt.
fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => "System",
            };
            let text = match &m.content {
                MessageContent::Text(t) => t.clone(),
                MessageContent::Parts(parts) => parts
                    .iter()
                    .map(|p| match p {
                        freja_model::ContentPart::Text { text } => text.as_str(),
                        freja_model::ContentPart::Image { .. } => "[image]",
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
                MessageContent::ToolCall { function, .. } => {
                    format!("[tool_call: {}({})]", function.name, function.arguments)
                }
                MessageContent::ToolResult { content, .. } => {
                    format!("[tool_result: {content}]")
                }
            };
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use freja_model::{ScriptedMockProvider, Usage};

    use super::*;

    fn full_session() -> Session {
        let mut s = Session::new(1000);
        s.push(Message::system("You are a coder."));
        for i in 0..10 {
            s.push(Message::user(format!("question {i}")));
            s.push(Message::assistant(format!("answer {i}")));
        }
        s.tracker.observe(&Usage {
            prompt_tokens: 900,
            completion_tokens: 50,
            total_tokens: 950,
        });
        s
    }

    fn config() -> AgentConfig {
        AgentConfig::default()
    }

    #[tokio::test]
    async fn summarisation_replaces_history_with_three_messages() {
        let mut session = full_session();
        let model = ScriptedMockProvider::always_text("the gist of it");
        let (tx, mut rx) = mpsc::channel(8);

        maybe_summarise(&mut session, &model, &config(), None, &tx)
            .await
            .unwrap();

        assert_eq!(session.messages.len(), 3);
        assert_eq!(session.messages[0].role, Role::System);
        let summary = session.messages[1].as_text().unwrap();
        assert!(summary.starts_with("[CONVERSATION SUMMARY"));
        assert!(summary.contains("the gist of it"));
        assert!(summary.ends_with("END SUMMARY]"));
        assert_eq!(session.messages[2].role, Role::Assistant);

        let ev = rx.try_recv().unwrap();
        assert!(matches!(ev, AgentEvent::Summarised { tokens_before: 950, .. }));
    }

    #[tokio::test]
    async fn tracker_resets_below_threshold() {
        let mut session = full_session();
        let model = ScriptedMockProvider::always_text("short");
        let (tx, _rx) = mpsc::channel(8);

        maybe_summarise(&mut session, &model, &config(), None, &tx)
            .await
            .unwrap();

        let cfg = config();
        assert!(
            (session.tracker.current_tokens() as f32)
                <= session.tracker.max_context_length() as f32 * cfg.auto_summarise_threshold,
            "tracker must reset below the threshold, got {}",
            session.tracker.current_tokens()
        );
    }

    #[tokio::test]
    async fn below_threshold_is_a_no_op() {
        let mut session = full_session();
        session.tracker.observe(&Usage {
            prompt_tokens: 100,
            completion_tokens: 10,
            total_tokens: 110,
        });
        let model = ScriptedMockProvider::always_text("should not be called");
        let (tx, _rx) = mpsc::channel(8);

        maybe_summarise(&mut session, &model, &config(), None, &tx)
            .await
            .unwrap();
        assert_eq!(session.messages.len(), 21, "history must be untouched");
        assert!(model.last_request().is_none(), "no model call expected");
    }

    #[tokio::test]
    async fn too_few_exchanges_is_a_no_op() {
        let mut session = Session::new(1000);
        session.push(Message::system("sys"));
        session.push(Message::user("only question"));
        session.tracker.observe(&Usage {
            prompt_tokens: 940,
            completion_tokens: 10,
            total_tokens: 950,
        });
        let model = ScriptedMockProvider::always_text("nope");
        let (tx, _rx) = mpsc::channel(8);

        maybe_summarise(&mut session, &model, &config(), None, &tx)
            .await
            .unwrap();
        assert_eq!(session.messages.len(), 2);
        assert!(model.last_request().is_none());
    }

    #[tokio::test]
    async fn failed_model_call_leaves_session_untouched() {
        let mut session = full_session();
        let before = session.messages.len();
        // Script with no content at all — treated as an empty summary.
        let model = ScriptedMockProvider::new(vec![vec![ResponseEvent::Done]]);
        let (tx, mut rx) = mpsc::channel(8);

        maybe_summarise(&mut session, &model, &config(), None, &tx)
            .await
            .unwrap();
        assert_eq!(session.messages.len(), before);
        assert_eq!(session.tracker.current_tokens(), 950, "tracker untouched");
        assert!(rx.try_recv().is_err(), "no Summarised event on failure");
    }

    #[tokio::test]
    async fn summarisation_request_offers_no_tools() {
        let mut session = full_session();
        let model = ScriptedMockProvider::always_text("summary");
        let (tx, _rx) = mpsc::channel(8);

        maybe_summarise(&mut session, &model, &config(), None, &tx)
            .await
            .unwrap();
        let req = model.last_request().unwrap();
        assert!(req.tools.is_empty(), "summarisation must not offer tools");
        assert!(!req.stream, "summarisation is a buffered completion");
    }

    #[test]
    fn serialize_history_includes_tool_traffic() {
        let msgs = vec![
            Message::system("sys"),
            Message::user("run ls"),
            Message::tool_call("c1", "run_process", r#"{"cmd":"ls"}"#),
            Message::tool_result("c1", r#"{"stdout":"a.txt"}"#),
        ];
        let text = serialize_history(&msgs);
        assert!(!text.contains("sys"), "system message excluded");
        assert!(text.contains("run_process"));
        assert!(text.contains("a.txt"));
    }
}
