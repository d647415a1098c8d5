use std::fmt;

use crate::error::LlmError;
use crate::openai::OpenAiProvider;
use crate::provider::{ChatStream, LlmProvider, Message};
use crate::usage::SharedUsageSink;

/// A named OpenAI-compatible endpoint such as Groq.
#[derive(Clone)]
pub struct CompatibleProvider {
    inner: OpenAiProvider,
    provider_name: String,
}

impl CompatibleProvider {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        provider_name: String,
        api_key: String,
        base_url: String,
        model: String,
    ) -> Result<Self, LlmError> {
        let inner = OpenAiProvider::new(api_key, model)?
            .with_base_url(base_url)
            .with_provider_name(provider_name.clone());
        Ok(Self {
            inner,
            provider_name,
        })
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.inner = self.inner.with_client(client);
        self
    }

    #[must_use]
    pub fn with_usage_sink(mut self, usage: SharedUsageSink) -> Self {
        self.inner = self.inner.with_usage_sink(usage);
        self
    }
}

impl fmt::Debug for CompatibleProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompatibleProvider")
            .field("provider_name", &self.provider_name)
            .field("inner", &self.inner)
            .finish()
    }
}

impl LlmProvider for CompatibleProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.inner.chat(messages).await
    }

    async fn chat_stream(&self, messages: &[Message]) -> Result<ChatStream, LlmError> {
        self.inner.chat_stream(messages).await
    }

    async fn chat_json(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.inner.chat_json(messages).await
    }

    fn name(&self) -> &str {
        &self.provider_name
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn errors_carry_custom_provider_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let groq = CompatibleProvider::new(
            "groq".into(),
            "gsk".into(),
            format!("{}/openai/v1", server.uri()),
            "gemma2-9b-it".into(),
        )
        .unwrap();

        assert_eq!(groq.name(), "groq");
        assert_eq!(groq.model(), "gemma2-9b-it");
        let err = groq.chat(&[Message::user("q")]).await.unwrap_err();
        assert!(err.to_string().starts_with("groq rejected"));
    }
}
