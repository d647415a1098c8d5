//! Domain gate run before any retrieval or generation work.

use std::sync::Arc;

use codementor_llm::{LlmError, LlmProvider};

use crate::prompts;

/// Reply used when the classifier rejects a query without saying why.
pub const CANNED_REFUSAL: &str = "I am coding assistant created by DhiWise my name is CodeMentor and I am here to help you with your coding related queries only";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceVerdict {
    pub accepted: bool,
    /// Explanation when accepted, user-facing refusal otherwise.
    pub message: String,
}

/// Parse a `True ...` / `False ...` classifier reply.
///
/// Only a leading `True` token accepts the query; an empty or unexpected reply
/// is a rejection.
#[must_use]
pub fn parse_verdict(reply: &str) -> ComplianceVerdict {
    let reply = reply.trim();
    let (first, rest) = reply
        .split_once(char::is_whitespace)
        .unwrap_or((reply, ""));
    let rest = rest.trim();
    let accepted = first.trim_end_matches(|c: char| c.is_ascii_punctuation()) == "True";

    let message = if accepted || !rest.is_empty() {
        rest.to_owned()
    } else {
        CANNED_REFUSAL.to_owned()
    };
    ComplianceVerdict { accepted, message }
}

pub struct ComplianceGate<P> {
    provider: Arc<P>,
}

impl<P: LlmProvider> ComplianceGate<P> {
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// Classify `query` with a single provider call.
    ///
    /// # Errors
    ///
    /// Returns the provider failure unchanged.
    pub async fn check(&self, query: &str) -> Result<ComplianceVerdict, LlmError> {
        let reply = self
            .provider
            .chat(&prompts::compliance_messages(query))
            .await?;
        let verdict = parse_verdict(&reply);
        tracing::debug!(
            provider = self.provider.name(),
            accepted = verdict.accepted,
            "compliance checked"
        );
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use codementor_llm::mock::MockProvider;

    use super::*;

    #[test]
    fn true_prefix_accepts_with_explanation() {
        let v = parse_verdict("True this is about recursion");
        assert!(v.accepted);
        assert_eq!(v.message, "this is about recursion");
    }

    #[test]
    fn bare_false_uses_canned_refusal() {
        let v = parse_verdict("False");
        assert!(!v.accepted);
        assert_eq!(v.message, CANNED_REFUSAL);
    }

    #[test]
    fn false_with_text_uses_that_text() {
        let v = parse_verdict("False sorry not a coding question");
        assert!(!v.accepted);
        assert_eq!(v.message, "sorry not a coding question");
    }

    #[test]
    fn trailing_punctuation_on_token_is_tolerated() {
        let v = parse_verdict("True, it asks about Rust lifetimes");
        assert!(v.accepted);
        assert_eq!(v.message, "it asks about Rust lifetimes");
    }

    #[test]
    fn true_later_in_text_does_not_accept() {
        let v = parse_verdict("Answer: True");
        assert!(!v.accepted);
        assert_eq!(v.message, "True");
    }

    #[test]
    fn empty_reply_rejects_with_canned_refusal() {
        let v = parse_verdict("   ");
        assert!(!v.accepted);
        assert_eq!(v.message, CANNED_REFUSAL);
    }

    #[test]
    fn newline_separates_decision_from_message() {
        let v = parse_verdict("False\nI only answer programming questions.");
        assert!(!v.accepted);
        assert_eq!(v.message, "I only answer programming questions.");
    }

    #[tokio::test]
    async fn gate_sends_query_to_provider() {
        let provider = Arc::new(MockProvider::with_responses(vec![
            "True asks about sorting".into(),
        ]));
        let gate = ComplianceGate::new(Arc::clone(&provider));
        let v = gate.check("how do I sort a vec").await.unwrap();
        assert!(v.accepted);
        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0][1].content.contains("how do I sort a vec"));
    }

    #[tokio::test]
    async fn gate_propagates_provider_failure() {
        let gate = ComplianceGate::new(Arc::new(MockProvider::failing()));
        let err = gate.check("q").await.unwrap_err();
        assert_eq!(err.kind(), "provider_unavailable");
    }
}
