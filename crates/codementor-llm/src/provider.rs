use std::future::Future;
use std::pin::Pin;

use futures_core::Stream;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Incremental text segments from a streaming generation call.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

pub trait LlmProvider: Send + Sync {
    /// Send messages to the model and return the full assistant text.
    ///
    /// # Errors
    ///
    /// Returns a classified `LlmError` if the call fails or the response is malformed.
    fn chat(&self, messages: &[Message]) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Stream the assistant text as it is generated.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened. Mid-stream failures are
    /// yielded as `Err` items.
    fn chat_stream(
        &self,
        messages: &[Message],
    ) -> impl Future<Output = Result<ChatStream, LlmError>> + Send;

    /// Ask for a JSON object response. Providers without a JSON mode fall back to `chat`.
    ///
    /// # Errors
    ///
    /// Same as [`LlmProvider::chat`].
    fn chat_json(
        &self,
        messages: &[Message],
    ) -> impl Future<Output = Result<String, LlmError>> + Send {
        self.chat(messages)
    }

    /// Ask for a JSON response matching `T`'s schema and decode it.
    ///
    /// # Errors
    ///
    /// Provider failures propagate unchanged; output that does not decode into `T`
    /// yields `LlmError::StructuredParse`.
    fn chat_typed<T>(
        &self,
        messages: &[Message],
    ) -> impl Future<Output = Result<T, LlmError>> + Send
    where
        T: DeserializeOwned + JsonSchema,
        Self: Sized,
    {
        async move {
            let messages = with_schema_instruction::<T>(messages)?;
            let raw = self.chat_json(&messages).await?;
            parse_json_output(&raw)
        }
    }

    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

/// Append the JSON schema of `T` to the system message (or prepend one).
///
/// # Errors
///
/// Returns `StructuredParse` if the schema cannot be serialized.
pub fn with_schema_instruction<T: JsonSchema>(
    messages: &[Message],
) -> Result<Vec<Message>, LlmError> {
    let schema = schemars::schema_for!(T);
    let schema = serde_json::to_string(&schema)
        .map_err(|e| LlmError::StructuredParse(format!("schema serialization: {e}")))?;
    let instruction =
        format!("Respond with a single JSON object that validates against this JSON schema:\n{schema}");

    let mut out = messages.to_vec();
    if let Some(system) = out.iter_mut().find(|m| m.role == Role::System) {
        system.content.push_str("\n\n");
        system.content.push_str(&instruction);
    } else {
        out.insert(0, Message::system(instruction));
    }
    Ok(out)
}

/// Decode a model's JSON answer, tolerating surrounding code fences.
///
/// # Errors
///
/// Returns `StructuredParse` if the text is not valid JSON for `T`.
pub fn parse_json_output<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    let trimmed = strip_code_fence(raw.trim());
    serde_json::from_str(trimmed).map_err(|e| LlmError::StructuredParse(e.to_string()))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Answer {
        value: String,
    }

    #[test]
    fn parse_plain_json() {
        let out: Answer = parse_json_output(r#"{"value":"x"}"#).unwrap();
        assert_eq!(out.value, "x");
    }

    #[test]
    fn parse_fenced_json() {
        let raw = "```json\n{\"value\":\"fenced\"}\n```";
        let out: Answer = parse_json_output(raw).unwrap();
        assert_eq!(out.value, "fenced");
    }

    #[test]
    fn parse_garbage_is_structured_parse_error() {
        let err = parse_json_output::<Answer>("I think the answer is x").unwrap_err();
        assert!(matches!(err, LlmError::StructuredParse(_)));
    }

    #[test]
    fn schema_appended_to_existing_system_message() {
        let messages = vec![Message::system("Be brief."), Message::user("hi")];
        let out = with_schema_instruction::<Answer>(&messages).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[0].content.starts_with("Be brief."));
        assert!(out[0].content.contains("\"value\""));
    }

    #[test]
    fn schema_inserted_when_no_system_message() {
        let messages = vec![Message::user("hi")];
        let out = with_schema_instruction::<Answer>(&messages).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].role, Role::System);
    }
}
