//! Context window management: token estimation and history truncation.
//!
//! Callers get manual control over conversation memory here rather than
//! a hidden auto-summarizer: truncation only happens when asked.

use crate::types::{Message, Role};

/// Rough token estimate: ~1 token per 4 characters, 70-85% accurate across
/// model families. Good enough for proactive truncation decisions.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages
        .iter()
        .map(|m| m.content.to_display_string().len())
        .sum();
    chars.div_ceil(4)
}

/// True if `messages` is estimated to exceed `limit` tokens.
pub fn is_approaching_limit(messages: &[Message], limit: usize) -> bool {
    estimate_tokens(messages) > limit
}

/// Keep only the most recent `keep_turns` messages, optionally always
/// preserving a leading system message regardless of turn count.
pub fn truncate_messages(messages: &[Message], keep_turns: usize, preserve_system: bool) -> Vec<Message> {
    if messages.len() <= keep_turns {
        return messages.to_vec();
    }

    let system_prefix: Vec<Message> = if preserve_system {
        messages
            .iter()
            .take_while(|m| m.role == Role::System)
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    let tail_start = messages.len().saturating_sub(keep_turns);
    let mut tail: Vec<Message> = messages[tail_start..].to_vec();

    let mut result = system_prefix;
    result.append(&mut tail);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_scales_with_length() {
        let short = vec![Message::user("hi")];
        let long = vec![Message::user("hi".repeat(100))];
        assert!(estimate_tokens(&long) > estimate_tokens(&short));
    }

    #[test]
    fn truncate_keeps_only_recent_turns() {
        let messages: Vec<Message> = (0..10).map(|i| Message::user(format!("m{i}"))).collect();
        let truncated = truncate_messages(&messages, 3, false);
        assert_eq!(truncated.len(), 3);
        assert_eq!(truncated[0].content.to_display_string(), "m7");
    }

    #[test]
    fn truncate_preserves_leading_system_message() {
        let mut messages = vec![Message::system("rules")];
        messages.extend((0..10).map(|i| Message::user(format!("m{i}"))));
        let truncated = truncate_messages(&messages, 3, true);
        assert_eq!(truncated.len(), 4);
        assert_eq!(truncated[0].role, Role::System);
    }
}
