//! Shared HTTP client construction and response classification.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::LlmError;

const USER_AGENT: &str = concat!("codementor/", env!("CARGO_PKG_VERSION"));

/// Timeout windows applied to every outbound provider call.
///
/// `request_secs` bounds the whole exchange including the upload, so it plays
/// the role of the write timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect_secs: u64,
    pub read_secs: u64,
    pub request_secs: u64,
    pub pool_idle_secs: u64,
}

impl HttpTimeouts {
    /// Generation and embedding calls: long reads for large prompts.
    #[must_use]
    pub fn generation() -> Self {
        Self {
            connect_secs: 60,
            read_secs: 300,
            request_secs: 300,
            pool_idle_secs: 60,
        }
    }

    /// Vector store and rerank calls.
    #[must_use]
    pub fn vector() -> Self {
        Self {
            connect_secs: 60,
            read_secs: 120,
            request_secs: 120,
            pool_idle_secs: 60,
        }
    }
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self::generation()
    }
}

/// Build a client with the given timeouts, rustls TLS and the `codementor/{version}` user agent.
///
/// # Errors
///
/// Returns `InvalidArgument` if the TLS backend cannot be initialized.
pub fn build_client(timeouts: &HttpTimeouts) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(timeouts.connect_secs))
        .read_timeout(Duration::from_secs(timeouts.read_secs))
        .timeout(Duration::from_secs(timeouts.request_secs))
        .pool_idle_timeout(Duration::from_secs(timeouts.pool_idle_secs))
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| LlmError::InvalidArgument(format!("http client construction failed: {e}")))
}

/// Send a request and fail on any non-success status.
///
/// # Errors
///
/// Returns a classified `LlmError` for transport failures and non-2xx statuses.
pub async fn send(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, LlmError> {
    let response = request
        .send()
        .await
        .map_err(|e| LlmError::from_transport(provider, &e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(provider, %status, "provider request failed");
    Err(LlmError::from_status(provider, status, &body))
}

/// Send a request and decode the JSON body into `T`.
///
/// # Errors
///
/// Returns a classified `LlmError`; a body that does not decode into `T` is a `ProviderError`.
pub async fn send_json<T: DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, LlmError> {
    let response = send(provider, request).await?;
    let text = response
        .text()
        .await
        .map_err(|e| LlmError::from_transport(provider, &e))?;
    serde_json::from_str(&text).map_err(|e| LlmError::malformed(provider, e))
}

/// Strip trailing slashes so paths can be appended with `format!`.
#[must_use]
pub fn trim_base_url(mut base_url: String) -> String {
    while base_url.ends_with('/') {
        base_url.pop();
    }
    base_url
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn client_builds_successfully() {
        assert!(build_client(&HttpTimeouts::generation()).is_ok());
        assert!(build_client(&HttpTimeouts::vector()).is_ok());
    }

    #[test]
    fn base_url_trailing_slashes_removed() {
        assert_eq!(
            trim_base_url("https://api.example.com/v1//".into()),
            "https://api.example.com/v1"
        );
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        let client = build_client(&HttpTimeouts::vector()).unwrap();
        let err = send("test", client.get("http://127.0.0.1:1/nothing"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "provider_unavailable");
    }

    #[tokio::test]
    async fn slow_response_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let timeouts = HttpTimeouts {
            connect_secs: 1,
            read_secs: 1,
            request_secs: 1,
            pool_idle_secs: 1,
        };
        let client = build_client(&timeouts).unwrap();
        let err = send("test", client.get(format!("{}/slow", server.uri())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn malformed_body_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = build_client(&HttpTimeouts::vector()).unwrap();
        let err = send_json::<serde_json::Value>("test", client.get(format!("{}/bad", server.uri())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "provider_error");
    }

    #[tokio::test]
    async fn rejected_request_keeps_remote_detail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(serde_json::json!({"error": {"message": "forbidden key"}})),
            )
            .mount(&server)
            .await;

        let client = build_client(&HttpTimeouts::vector()).unwrap();
        let err = send("test", client.get(format!("{}/auth", server.uri())))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert!(err.to_string().contains("forbidden key"));
    }
}
