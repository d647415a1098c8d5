use std::sync::Arc;

use codementor_llm::LlmProvider;

use crate::error::{CoreError, Result};
use crate::prompts;
use crate::request::RewriteRequest;

/// Merges an edited fragment back into its original file through the generation provider.
pub struct CodeRewriter<P> {
    provider: Arc<P>,
}

impl<P: LlmProvider> CodeRewriter<P> {
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// # Errors
    ///
    /// Returns `InvalidRequest` when there is no edit to apply, or the provider failure.
    pub async fn rewrite(&self, request: &RewriteRequest) -> Result<String> {
        if request.rewritten_code.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "rewritten_code must not be empty".into(),
            ));
        }
        let merged = self
            .provider
            .chat(&prompts::rewrite_messages(
                &request.original_file,
                &request.rewritten_code,
            ))
            .await?;
        tracing::info!(
            original_len = request.original_file.len(),
            merged_len = merged.len(),
            "code rewritten"
        );
        Ok(merged)
    }
}
