use reqwest::StatusCode;

/// Failure of a remote provider call.
///
/// Every adapter maps its failures onto these variants so callers can tell a
/// rejected request apart from an unreachable or slow provider.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Remote 4xx: bad request, auth failure, quota. Carries the remote detail.
    #[error("{provider} rejected the request (status {status}): {detail}")]
    ClientRejected {
        provider: String,
        status: u16,
        detail: String,
    },

    /// The provider could not be reached (DNS, connect, TLS, reset).
    #[error("failed to connect to {provider}: {detail}")]
    ProviderUnavailable { provider: String, detail: String },

    /// Remote 5xx or a response body that does not match the expected shape.
    #[error("{provider} error: {detail}")]
    ProviderError { provider: String, detail: String },

    /// No response within the configured window.
    #[error("{provider} request timed out")]
    Timeout { provider: String },

    #[error("structured output parse failed: {0}")]
    StructuredParse(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;

impl LlmError {
    /// Classify a transport-level `reqwest` failure.
    #[must_use]
    pub fn from_transport(provider: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                provider: provider.to_owned(),
            }
        } else if err.is_connect() || err.is_request() {
            Self::ProviderUnavailable {
                provider: provider.to_owned(),
                detail: err.to_string(),
            }
        } else {
            Self::ProviderError {
                provider: provider.to_owned(),
                detail: err.to_string(),
            }
        }
    }

    /// Classify a non-success HTTP status with the response body as detail.
    #[must_use]
    pub fn from_status(provider: &str, status: StatusCode, body: &str) -> Self {
        let detail = extract_detail(body);
        if status.is_client_error() {
            Self::ClientRejected {
                provider: provider.to_owned(),
                status: status.as_u16(),
                detail,
            }
        } else {
            Self::ProviderError {
                provider: provider.to_owned(),
                detail: format!("status {status}: {detail}"),
            }
        }
    }

    #[must_use]
    pub fn malformed(provider: &str, detail: impl std::fmt::Display) -> Self {
        Self::ProviderError {
            provider: provider.to_owned(),
            detail: format!("malformed response: {detail}"),
        }
    }

    /// Stable snake_case name of the failure class.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientRejected { .. } => "client_rejected",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ProviderError { .. } | Self::StructuredParse(_) => "provider_error",
            Self::Timeout { .. } => "timeout",
            Self::InvalidArgument(_) => "invalid_argument",
        }
    }

    /// Remote status for rejected requests.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ClientRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

const MAX_DETAIL_LEN: usize = 512;

fn extract_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            value.pointer("/error/message"),
            value.pointer("/detail"),
            value.pointer("/message"),
            value.pointer("/error"),
        ];
        if let Some(msg) = candidates.into_iter().flatten().find_map(|v| v.as_str()) {
            return truncate(msg.trim());
        }
    }
    truncate(body.trim())
}

fn truncate(trimmed: &str) -> String {
    if trimmed.len() <= MAX_DETAIL_LEN {
        return trimmed.to_owned();
    }
    let mut end = MAX_DETAIL_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_status_is_rejected() {
        let err = LlmError::from_status(
            "voyage",
            StatusCode::UNAUTHORIZED,
            r#"{"detail":"invalid api key"}"#,
        );
        assert_eq!(err.kind(), "client_rejected");
        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("invalid api key"));
    }

    #[test]
    fn server_error_status_is_provider_error() {
        let err = LlmError::from_status("claude", StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(err.kind(), "provider_error");
        assert!(err.status().is_none());
        assert!(err.to_string().contains("upstream down"));
    }

    #[test]
    fn nested_error_message_extracted() {
        let body = r#"{"type":"error","error":{"type":"invalid_request_error","message":"max_tokens too large"}}"#;
        assert_eq!(extract_detail(body), "max_tokens too large");
    }

    #[test]
    fn long_plain_body_truncated() {
        let body = "x".repeat(2000);
        let detail = extract_detail(&body);
        assert!(detail.len() < 600);
        assert!(detail.ends_with("..."));
    }

    proptest::proptest! {
        #[test]
        fn detail_never_exceeds_bound(body in "\\PC{0,1200}") {
            let detail = extract_detail(&body);
            proptest::prop_assert!(detail.len() <= MAX_DETAIL_LEN + 3);
        }
    }

    #[test]
    fn structured_parse_counts_as_provider_error() {
        let err = LlmError::StructuredParse("missing field".into());
        assert_eq!(err.kind(), "provider_error");
    }
}
