//! Session-scoped chat state, passed explicitly into handlers so the
//! retrieval and answer logic never depends on an ambient UI runtime.

use crate::llm::Role;

/// One exchange entry in the session transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    /// Who spoke.
    pub role: Role,
    /// What was said.
    pub text: String,
    /// For assistant turns, a short excerpt of the grounding context used.
    pub context_note: Option<String>,
}

/// Ordered chat history for one interactive session. Never persisted.
#[derive(Debug, Default)]
pub struct ChatSession {
    turns: Vec<ChatTurn>,
}

impl ChatSession {
    /// Starts an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a question from the user.
    pub fn record_user(&mut self, text: impl Into<String>) {
        self.turns.push(ChatTurn {
            role: Role::User,
            text: text.into(),
            context_note: None,
        });
    }

    /// Records an assistant reply along with an optional context excerpt.
    pub fn record_assistant(&mut self, text: impl Into<String>, context_note: Option<String>) {
        self.turns.push(ChatTurn {
            role: Role::Assistant,
            text: text.into(),
            context_note,
        });
    }

    /// Full transcript in order.
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Number of recorded turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True when nothing has been said yet.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drops the transcript, keeping the session object alive.
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Truncates grounding context into a short note for the transcript.
pub fn context_excerpt(context: &str, max_chars: usize) -> Option<String> {
    let trimmed = context.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().count() <= max_chars {
        return Some(trimmed.to_string());
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    Some(format!("{cut}..."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_preserves_order() {
        let mut session = ChatSession::new();
        session.record_user("What is the bolus dose?");
        session.record_assistant("20 mL/kg.", Some("bolus context".to_string()));
        session.record_user("And maintenance?");

        assert_eq!(session.len(), 3);
        assert_eq!(session.turns()[0].role, Role::User);
        assert_eq!(session.turns()[1].role, Role::Assistant);
        assert_eq!(
            session.turns()[1].context_note.as_deref(),
            Some("bolus context")
        );

        session.clear();
        assert!(session.is_empty());
    }

    #[test]
    fn excerpts_truncate_on_char_boundaries() {
        assert_eq!(context_excerpt("  ", 10), None);
        assert_eq!(context_excerpt("short", 10).as_deref(), Some("short"));
        let long = context_excerpt("a very long grounding context body", 10).expect("note");
        assert_eq!(long, "a very lon...");
    }
}
