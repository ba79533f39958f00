// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use freja_model::{Message, Role, Usage};
use uuid::Uuid;

/// Tracks cumulative token usage against the model's context window.
///
/// The server's view is authoritative: `current_tokens` is set to
/// `usage.total_tokens` whenever a completion reports usage, and holds its
/// last value otherwise.  No byte-based estimation happens during normal
/// operation — the only estimate is the seed value after a summarisation,
/// before the next completion reports real numbers.
#[derive(Debug, Clone)]
pub struct TokenTracker {
    max_context_length: usize,
    current_tokens: usize,
}

impl TokenTracker {
    pub fn new(max_context_length: usize) -> Self {
        Self {
            max_context_length,
            current_tokens: 0,
        }
    }

    /// Record the usage from one completion.
    pub fn observe(&mut self, usage: &Usage) {
        self.current_tokens = usage.total_tokens as usize;
    }

    /// Fraction of the context window consumed (0.0–1.0; 0.0 for an
    /// unknown window).
    pub fn usage_fraction(&self) -> f32 {
        if self.max_context_length == 0 {
            return 0.0;
        }
        self.current_tokens as f32 / self.max_context_length as f32
    }

    /// Reset after a successful summarisation to the estimated size of the
    /// replacement messages.
    pub fn reset(&mut self, seed_tokens: usize) {
        self.current_tokens = seed_tokens;
    }

    pub fn current_tokens(&self) -> usize {
        self.current_tokens
    }

    pub fn max_context_length(&self) -> usize {
        self.max_context_length
    }

    pub fn set_max_context_length(&mut self, max: usize) {
        self.max_context_length = max;
    }
}

/// One ongoing conversation: message history plus its token tracker.
///
/// A session is owned by exactly one conversation driver at a time;
/// concurrent completions on one session are prevented structurally by
/// `&mut` access.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    pub tracker: TokenTracker,
}

impl Session {
    pub fn new(max_context_tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            tracker: TokenTracker::new(max_context_tokens),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// Replace the message list wholesale (summarisation, history edit).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Number of non-system messages — the "exchanges" the summarisation
    /// gate counts.
    pub fn non_system_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role != Role::System)
            .count()
    }

    /// Clear the conversation, preserving only the system message.
    pub fn clear(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
        self.tracker.reset(0);
    }
}

/// Rough chars/4 token estimate, used only to seed the tracker after a
/// summarisation until the server reports real usage.
pub(crate) fn estimate_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages
        .iter()
        .map(|m| match &m.content {
            freja_model::MessageContent::Text(t) => t.len(),
            freja_model::MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    freja_model::ContentPart::Text { text } => text.len(),
                    freja_model::ContentPart::Image { .. } => 0,
                })
                .sum(),
            freja_model::MessageContent::ToolCall { function, .. } => {
                function.name.len() + function.arguments.len()
            }
            freja_model::MessageContent::ToolResult { content, .. } => content.len(),
        })
        .sum();
    (chars / 4).max(1)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_unique_id() {
        let a = Session::new(1000);
        let b = Session::new(1000);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn new_session_starts_empty() {
        let s = Session::new(1000);
        assert!(s.messages.is_empty());
        assert_eq!(s.tracker.current_tokens(), 0);
    }

    #[test]
    fn tracker_observe_takes_server_total() {
        let mut t = TokenTracker::new(1000);
        t.observe(&Usage {
            prompt_tokens: 700,
            completion_tokens: 50,
            total_tokens: 750,
        });
        assert_eq!(t.current_tokens(), 750);
    }

    #[test]
    fn tracker_holds_last_value_between_reports() {
        let mut t = TokenTracker::new(1000);
        t.observe(&Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 300,
        });
        // No new report — the value must hold.
        assert_eq!(t.current_tokens(), 300);
        assert!((t.usage_fraction() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn usage_fraction_zero_for_unknown_window() {
        let t = TokenTracker::new(0);
        assert_eq!(t.usage_fraction(), 0.0);
    }

    #[test]
    fn reset_seeds_current_tokens() {
        let mut t = TokenTracker::new(1000);
        t.observe(&Usage {
            prompt_tokens: 900,
            completion_tokens: 50,
            total_tokens: 950,
        });
        t.reset(40);
        assert_eq!(t.current_tokens(), 40);
    }

    #[test]
    fn non_system_count_ignores_system() {
        let mut s = Session::new(1000);
        s.push(Message::system("sys"));
        s.push(Message::user("u"));
        s.push(Message::assistant("a"));
        assert_eq!(s.non_system_count(), 2);
    }

    #[test]
    fn clear_preserves_only_system_message() {
        let mut s = Session::new(1000);
        s.push(Message::system("sys"));
        s.push(Message::user("u"));
        s.push(Message::assistant("a"));
        s.clear();
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.messages[0].role, Role::System);
        assert_eq!(s.tracker.current_tokens(), 0);
    }

    #[test]
    fn estimate_counts_tool_messages() {
        let msgs = vec![
            Message::tool_call("id", "aaaa", "bbbbbbbb"),   // 12 chars
            Message::tool_result("id", "1234567890123456"), // 16 chars
        ];
        assert_eq!(estimate_tokens(&msgs), 7); // 28 / 4
    }

    #[test]
    fn estimate_has_floor_of_one() {
        assert_eq!(estimate_tokens(&[Message::user("hi")]), 1);
    }
}
