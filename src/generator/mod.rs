//! Answer generators.
//!
//! A [`Generator`] streams tokens for a query over retrieved context.
//! Streams are delivered through a bounded channel; every stream ends
//! with exactly one event carrying a `finish_reason`, including
//! upstream failures, so clients always see a terminal marker.

pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::registry::Component;
use crate::schema::ComponentEntry;

/// Estimated characters per token, used for context budgeting.
pub const CHARS_PER_TOKEN: usize = 4;

/// Share of the context window reserved for conversation history.
const HISTORY_WINDOW_SHARE: f64 = 0.375;

/// One streamed token event. `finish_reason` is empty for
/// intermediate tokens and non-empty exactly once, on the final event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEvent {
    pub message: String,
    pub finish_reason: String,
}

impl TokenEvent {
    pub fn token(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            finish_reason: String::new(),
        }
    }

    pub fn stop(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            finish_reason: "stop".to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.finish_reason.is_empty()
    }
}

/// One past exchange in the conversation, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    #[serde(rename = "type")]
    pub role: String,
    pub content: String,
}

/// A chat message as sent upstream.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// A pluggable answer generator.
#[async_trait]
pub trait Generator: Component {
    /// Model context window in estimated tokens. Context passed to
    /// [`generate_stream`](Generator::generate_stream) is truncated
    /// to fit this.
    fn context_window(&self) -> usize;

    /// Start streaming an answer. The returned receiver yields token
    /// events and is closed after the terminal event.
    async fn generate_stream(
        &self,
        config: &ComponentEntry,
        query: &str,
        context: &str,
        conversation: &[ConversationEntry],
    ) -> Result<mpsc::Receiver<TokenEvent>>;
}

/// Assemble the upstream message list: system prompt, truncated
/// history, then the query joined with its retrieved context. History
/// is dropped oldest-first until it fits its share of the window.
pub fn build_messages(
    system: &str,
    conversation: &[ConversationEntry],
    query: &str,
    context: &str,
    context_window: usize,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage {
        role: "system".to_string(),
        content: system.to_string(),
    }];

    let history_budget =
        (context_window as f64 * HISTORY_WINDOW_SHARE) as usize * CHARS_PER_TOKEN;
    let mut kept: Vec<&ConversationEntry> = Vec::new();
    let mut used = 0usize;
    for entry in conversation.iter().rev() {
        let cost = entry.content.chars().count();
        if used + cost > history_budget {
            break;
        }
        used += cost;
        kept.push(entry);
    }
    for entry in kept.iter().rev() {
        messages.push(ChatMessage {
            role: if entry.role == "user" { "user" } else { "assistant" }.to_string(),
            content: entry.content.clone(),
        });
    }

    messages.push(ChatMessage {
        role: "user".to_string(),
        content: format!("Answer this query: '{query}' with this provided context: {context}"),
    });
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(role: &str, content: &str) -> ConversationEntry {
        ConversationEntry {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn final_message_joins_query_and_context() {
        let messages = build_messages("be helpful", &[], "what is verba", "ctx here", 1000);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        let last = messages.last().unwrap();
        assert!(last.content.contains("'what is verba'"));
        assert!(last.content.contains("ctx here"));
    }

    #[test]
    fn history_is_truncated_oldest_first() {
        let old = entry("user", &"o".repeat(2000));
        let recent = entry("assistant", &"r".repeat(100));
        // budget: 0.375 * 1000 tokens * 4 chars = 1500 chars, only the
        // recent entry fits
        let messages = build_messages("", &[old, recent], "q", "c", 1000);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, "assistant");
        assert!(messages[1].content.starts_with('r'));
    }

    #[test]
    fn history_keeps_order_when_it_fits() {
        let turns = vec![entry("user", "first"), entry("assistant", "second")];
        let messages = build_messages("", &turns, "q", "c", 1000);
        assert_eq!(messages[1].content, "first");
        assert_eq!(messages[2].content, "second");
    }

    #[test]
    fn terminal_marker() {
        assert!(!TokenEvent::token("a").is_terminal());
        assert!(TokenEvent::stop("").is_terminal());
    }
}
