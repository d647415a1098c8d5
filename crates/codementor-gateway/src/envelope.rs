//! Uniform `{data, statuscode, detail, error}` response body.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use codementor_core::CoreError;
use serde::Serialize;

pub(crate) const QUERY_OK: &str = "Query processed successfully";
pub(crate) const RESYNC_OK: &str = "Resynced successfully";
const INTERNAL_ERROR: &str = "An internal server error occurred.";
const INVALID_REQUEST: &str = "The request is invalid.";

#[derive(Debug, Serialize)]
pub(crate) struct Envelope<T> {
    data: T,
    statuscode: u16,
    detail: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

impl<T: Serialize> Envelope<T> {
    pub(crate) fn ok(data: T, detail: &'static str) -> Self {
        Self {
            data,
            statuscode: StatusCode::OK.as_u16(),
            detail,
            error: String::new(),
            kind: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.statuscode).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Failure of a request handler, rendered as a failure envelope.
#[derive(Debug)]
pub(crate) struct ApiError {
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: "invalid_argument",
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: "internal",
            message: message.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::invalid(format!("malformed multipart body: {}", e.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = if self.kind == "invalid_argument" {
            (StatusCode::UNPROCESSABLE_ENTITY, INVALID_REQUEST)
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
        };
        if status.is_server_error() {
            tracing::error!(kind = self.kind, error = %self.message, "request failed");
        } else {
            tracing::info!(kind = self.kind, error = %self.message, "request rejected");
        }
        Envelope {
            data: serde_json::json!({}),
            statuscode: status.as_u16(),
            detail,
            error: self.message,
            kind: Some(self.kind),
        }
        .into_response()
    }
}

#[cfg(test)]
mod tests {
    use codementor_llm::LlmError;
    use serde_json::json;

    use super::*;

    #[test]
    fn success_shape() {
        let v = serde_json::to_value(Envelope::ok("answer", QUERY_OK)).unwrap();
        assert_eq!(
            v,
            json!({
                "data": "answer",
                "statuscode": 200,
                "detail": "Query processed successfully",
                "error": ""
            })
        );
    }

    #[test]
    fn provider_failure_is_internal() {
        let err = ApiError::from(CoreError::from(LlmError::ProviderError {
            provider: "claude".into(),
            detail: "overloaded".into(),
        }));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn invalid_request_is_unprocessable() {
        let resp = ApiError::invalid("email must not be empty").into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
