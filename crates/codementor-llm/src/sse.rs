use eventsource_stream::Eventsource;
use serde::Deserialize;
use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::provider::ChatStream;
use crate::usage::{SharedUsageSink, UsageRecord};

/// Convert an Anthropic Messages streaming response into a `ChatStream`.
///
/// Output token usage reported in `message_delta` is forwarded to `usage`.
pub(crate) fn claude_sse_to_stream(
    response: reqwest::Response,
    model: String,
    usage: SharedUsageSink,
) -> ChatStream {
    let event_stream = response.bytes_stream().eventsource();
    let mapped = event_stream
        .take_while(|event| !matches!(event, Ok(e) if e.event == "message_stop"))
        .filter_map(move |event| match event {
            Ok(event) => match parse_claude_sse_event(&event.data, &event.event) {
                ClaudeEvent::Text(text) => Some(Ok(text)),
                ClaudeEvent::Usage(output_tokens) => {
                    usage.record(UsageRecord::tokens(
                        "claude",
                        "chat_stream",
                        &model,
                        output_tokens,
                    ));
                    None
                }
                ClaudeEvent::Failed(err) => Some(Err(err)),
                ClaudeEvent::Skip => None,
            },
            Err(e) => Some(Err(LlmError::malformed("claude", e))),
        });
    Box::pin(mapped)
}

/// Convert an OpenAI-compatible streaming response into a `ChatStream`.
pub(crate) fn openai_sse_to_stream(response: reqwest::Response, provider: String) -> ChatStream {
    let event_stream = response.bytes_stream().eventsource();
    let mapped = event_stream
        .take_while(|event| !matches!(event, Ok(e) if e.data == "[DONE]"))
        .filter_map(move |event| match event {
            Ok(event) => parse_openai_sse_event(&event.data, &provider),
            Err(e) => Some(Err(LlmError::malformed(&provider, e))),
        });
    Box::pin(mapped)
}

#[derive(Debug)]
enum ClaudeEvent {
    Text(String),
    Usage(u64),
    Failed(LlmError),
    Skip,
}

fn parse_claude_sse_event(data: &str, event_type: &str) -> ClaudeEvent {
    match event_type {
        "content_block_delta" => match serde_json::from_str::<ClaudeStreamEvent>(data) {
            Ok(event) => {
                if let Some(delta) = event.delta
                    && delta.delta_type.as_deref() == Some("text_delta")
                    && !delta.text.is_empty()
                {
                    return ClaudeEvent::Text(delta.text);
                }
                ClaudeEvent::Skip
            }
            Err(e) => ClaudeEvent::Failed(LlmError::malformed("claude", e)),
        },
        "message_delta" => match serde_json::from_str::<ClaudeStreamEvent>(data) {
            Ok(ClaudeStreamEvent {
                usage: Some(usage), ..
            }) => ClaudeEvent::Usage(usage.output_tokens),
            _ => ClaudeEvent::Skip,
        },
        "error" => {
            let detail = serde_json::from_str::<ClaudeStreamEvent>(data)
                .ok()
                .and_then(|e| e.error)
                .map_or_else(
                    || data.to_owned(),
                    |err| format!("{}: {}", err.error_type, err.message),
                );
            ClaudeEvent::Failed(LlmError::ProviderError {
                provider: "claude".into(),
                detail: format!("stream error ({detail})"),
            })
        }
        _ => ClaudeEvent::Skip,
    }
}

fn parse_openai_sse_event(data: &str, provider: &str) -> Option<Result<String, LlmError>> {
    match serde_json::from_str::<OpenAiStreamChunk>(data) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.as_deref())
                .unwrap_or_default();
            if content.is_empty() {
                None
            } else {
                Some(Ok(content.to_owned()))
            }
        }
        Err(e) => Some(Err(LlmError::malformed(provider, e))),
    }
}

#[derive(Deserialize)]
struct ClaudeStreamEvent {
    #[serde(default)]
    delta: Option<ClaudeDelta>,
    #[serde(default)]
    usage: Option<ClaudeDeltaUsage>,
    #[serde(default)]
    error: Option<ClaudeStreamError>,
}

#[derive(Deserialize)]
struct ClaudeDelta {
    #[serde(rename = "type", default)]
    delta_type: Option<String>,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ClaudeDeltaUsage {
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize)]
struct ClaudeStreamError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
}
