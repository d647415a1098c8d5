use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::http::{self, HttpTimeouts};
use crate::provider::{ChatStream, LlmProvider, Message};
use crate::sse::openai_sse_to_stream;
use crate::usage::{SharedUsageSink, UsageRecord, tracing_sink};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat completions adapter. Also the transport for OpenAI-compatible
/// services through [`crate::compatible::CompatibleProvider`].
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
    provider_name: String,
    usage: SharedUsageSink,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("provider_name", &self.provider_name)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: String, model: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: http::build_client(&HttpTimeouts::generation())?,
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            model,
            max_tokens: None,
            provider_name: "openai".into(),
            usage: tracing_sink(),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = http::trim_base_url(base_url.into());
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_usage_sink(mut self, usage: SharedUsageSink) -> Self {
        self.usage = usage;
        self
    }

    #[must_use]
    pub(crate) fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = name.into();
        self
    }

    fn build_request(
        &self,
        messages: &[Message],
        stream: bool,
        json_mode: bool,
    ) -> reqwest::RequestBuilder {
        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            stream,
            response_format: json_mode.then_some(ResponseFormat {
                r#type: "json_object",
            }),
        };

        self.client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
    }

    async fn complete(&self, messages: &[Message], json_mode: bool) -> Result<String, LlmError> {
        let resp: ChatResponse = http::send_json(
            &self.provider_name,
            self.build_request(messages, false, json_mode),
        )
        .await?;

        if let Some(ref usage) = resp.usage {
            tracing::debug!(
                provider = %self.provider_name,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion usage"
            );
            self.usage.record(UsageRecord::tokens(
                &self.provider_name,
                "chat",
                &self.model,
                usage.total_tokens,
            ));
        }

        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::malformed(&self.provider_name, "no choices in response"))
    }
}

impl LlmProvider for OpenAiProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.complete(messages, false).await
    }

    async fn chat_stream(&self, messages: &[Message]) -> Result<ChatStream, LlmError> {
        let response = http::send(
            &self.provider_name,
            self.build_request(messages, true, false),
        )
        .await?;
        Ok(openai_sse_to_stream(response, self.provider_name.clone()))
    }

    async fn chat_json(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.complete(messages, true).await
    }

    fn name(&self) -> &str {
        &self.provider_name
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}
