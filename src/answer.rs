//! Grounded answer generation: prompt assembly from retrieved passages and a
//! single bounded call to the configured chat provider.

use crate::debug_log;
use crate::knowledge::KnowledgeBase;
use crate::llm::{ChatMessage, ChatProvider};
use crate::retriever::QueryResult;

/// Fixed reply used whenever the chat endpoint cannot produce one. The
/// session must always have something displayable, so transport failures are
/// absorbed here rather than raised.
pub const FALLBACK_ANSWER: &str = "I'm sorry, I can't reach the assistant model right now. \
Please try again in a moment, and consult senior medical staff directly for urgent clinical questions.";

const SYSTEM_PROMPT: &str = "You are a nursing reference assistant. Answer only from the \
numbered context passages provided. If they do not cover the question, say so plainly and \
suggest consulting medical professionals. Keep answers short and practical.";

/// A retrieved passage ready for prompt assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    /// Originating chunk id.
    pub chunk_id: usize,
    /// Similarity score from retrieval.
    pub score: f32,
    /// Passage text.
    pub text: String,
}

/// Resolves a ranked result against the snapshot's chunk text.
pub fn collect_passages(kb: &KnowledgeBase, result: &QueryResult) -> Vec<Passage> {
    result
        .iter()
        .filter_map(|(chunk_id, score)| {
            kb.chunk(chunk_id).map(|chunk| Passage {
                chunk_id,
                score,
                text: chunk.text.clone(),
            })
        })
        .collect()
}

/// Outcome of a connectivity probe against the chat endpoint.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// Whether the endpoint produced a completion.
    pub connected: bool,
    /// Endpoint description or failure detail.
    pub detail: String,
}

/// Answers questions through one configured chat provider.
pub struct AnswerEngine {
    provider: Box<dyn ChatProvider>,
}

impl AnswerEngine {
    /// Wraps the configured provider.
    pub fn new(provider: Box<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    /// Builds a grounded prompt and requests one completion. Never fails:
    /// any transport or decode problem yields [`FALLBACK_ANSWER`].
    pub fn answer(&self, question: &str, passages: &[Passage]) -> String {
        let messages = build_messages(question, passages);
        match self.provider.complete(&messages) {
            Ok(reply) => reply,
            Err(_err) => {
                debug_log!("chat completion failed, serving fallback: {_err}");
                FALLBACK_ANSWER.to_string()
            }
        }
    }

    /// Sends a minimal completion request to report endpoint reachability.
    pub fn probe(&self) -> ProbeReport {
        let messages = vec![ChatMessage::user("Reply with the single word: ready")];
        match self.provider.complete(&messages) {
            Ok(_) => ProbeReport {
                connected: true,
                detail: self.provider.describe(),
            },
            Err(err) => ProbeReport {
                connected: false,
                detail: err.to_string(),
            },
        }
    }

    /// Endpoint description for status output.
    pub fn describe(&self) -> String {
        self.provider.describe()
    }
}

fn build_messages(question: &str, passages: &[Passage]) -> Vec<ChatMessage> {
    let mut context = String::new();
    if passages.is_empty() {
        context.push_str("(no matching passages found in the reference document)");
    } else {
        for (idx, passage) in passages.iter().enumerate() {
            if idx > 0 {
                context.push_str("\n\n");
            }
            context.push_str(&format!(
                "[{}] (relevance {:.2}) {}",
                idx + 1,
                passage.score,
                passage.text.trim()
            ));
        }
    }

    let user = format!("Context:\n{context}\n\nQuestion: {question}");
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EndpointError;

    struct CannedProvider {
        reply: Option<String>,
    }

    impl ChatProvider for CannedProvider {
        fn complete(&self, _messages: &[ChatMessage]) -> Result<String, EndpointError> {
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(EndpointError::Unreachable("test stub".to_string())),
            }
        }

        fn describe(&self) -> String {
            "canned test provider".to_string()
        }
    }

    fn passage(chunk_id: usize, text: &str) -> Passage {
        Passage {
            chunk_id,
            score: 0.9,
            text: text.to_string(),
        }
    }

    #[test]
    fn unreachable_endpoint_yields_fallback() {
        let engine = AnswerEngine::new(Box::new(CannedProvider { reply: None }));
        let reply = engine.answer("What is the bolus dose?", &[passage(0, "20 mL/kg bolus.")]);
        assert_eq!(reply, FALLBACK_ANSWER);
    }

    #[test]
    fn successful_reply_is_returned_verbatim() {
        let engine = AnswerEngine::new(Box::new(CannedProvider {
            reply: Some("Give 20 mL/kg as a rapid bolus.".to_string()),
        }));
        let reply = engine.answer("What is the bolus dose?", &[passage(0, "20 mL/kg bolus.")]);
        assert_eq!(reply, "Give 20 mL/kg as a rapid bolus.");
    }

    #[test]
    fn prompt_carries_passages_and_question() {
        let messages = build_messages(
            "How much maintenance fluid?",
            &[
                passage(3, "First 10 kg: 100 mL/kg/day."),
                passage(7, "Next 10 kg: 50 mL/kg/day."),
            ],
        );
        assert_eq!(messages.len(), 2);
        let user = &messages[1].content;
        assert!(user.contains("[1]"));
        assert!(user.contains("[2]"));
        assert!(user.contains("First 10 kg"));
        assert!(user.contains("Question: How much maintenance fluid?"));
    }

    #[test]
    fn empty_retrieval_is_flagged_in_prompt() {
        let messages = build_messages("Anything?", &[]);
        assert!(messages[1].content.contains("no matching passages"));
    }

    #[test]
    fn probe_reports_failure_detail() {
        let engine = AnswerEngine::new(Box::new(CannedProvider { reply: None }));
        let report = engine.probe();
        assert!(!report.connected);
        assert!(report.detail.contains("unreachable"));
    }
}
