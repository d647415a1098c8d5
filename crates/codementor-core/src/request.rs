//! Request and response shapes of the query, resync and rewrite use cases.

use codementor_index::UpsertSummary;
use serde::{Deserialize, Serialize};

use crate::analysis::QueryAnalysisResult;
use crate::error::{CoreError, Result};

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::InvalidRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_email(email: &str) -> Result<()> {
    require("email", email)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(CoreError::InvalidRequest(format!(
            "email is not a valid address: {email}"
        ))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub user_query: String,
    #[serde(default)]
    pub current_file_content: String,
    #[serde(default)]
    pub current_file_path: String,
    pub email: String,
    pub workspace_name: String,
}

impl QueryRequest {
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an empty query or workspace, or a malformed email.
    pub fn validate(&self) -> Result<()> {
        require("user_query", &self.user_query)?;
        require("workspace_name", &self.workspace_name)?;
        require_email(&self.email)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadRequest {
    pub email: String,
    /// Workspace identity the uploaded chunks belong to.
    pub filepath: String,
    pub is_first_time: bool,
}

impl FileUploadRequest {
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an empty workspace or a malformed email.
    pub fn validate(&self) -> Result<()> {
        require("filepath", &self.filepath)?;
        require_email(&self.email)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub response: String,
    pub analysis: QueryAnalysisResult,
    /// Seconds spent on the request.
    pub processing_time: f64,
    pub used_rag: bool,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Answered(QueryAnswer),
    /// The compliance gate turned the query down.
    Rejected { response: String },
}

impl QueryResponse {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Answered(answer) => &answer.response,
            Self::Rejected { response } => response,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncResponse {
    pub filepath: String,
    pub data: FileUploadRequest,
    pub message: String,
    pub upsert_result: UpsertSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRequest {
    #[serde(alias = "orignal_file")]
    pub original_file: String,
    pub rewritten_code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> QueryRequest {
        QueryRequest {
            user_query: "fix the null pointer".into(),
            email: "a@b.com".into(),
            workspace_name: "ws1".into(),
            ..QueryRequest::default()
        }
    }

    #[test]
    fn valid_query_passes() {
        query().validate().unwrap();
    }

    #[test]
    fn file_fields_default_to_empty() {
        let req: QueryRequest = serde_json::from_str(
            r#"{"user_query":"q","email":"a@b.com","workspace_name":"ws"}"#,
        )
        .unwrap();
        assert!(req.current_file_path.is_empty());
        assert!(req.current_file_content.is_empty());
    }

    #[test]
    fn blank_query_rejected() {
        let mut req = query();
        req.user_query = "  ".into();
        let err = req.validate().unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
        assert!(err.to_string().contains("user_query"));
    }

    #[test]
    fn malformed_email_rejected() {
        for email in ["ab.com", "@b.com", "a@b"] {
            let mut req = query();
            req.email = email.into();
            assert!(req.validate().is_err(), "{email} accepted");
        }
    }

    #[test]
    fn rejected_response_serializes_as_bare_text() {
        let resp = QueryResponse::Rejected {
            response: "no".into(),
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            serde_json::json!({"response": "no"})
        );
        assert_eq!(resp.text(), "no");
    }

    #[test]
    fn rewrite_request_accepts_legacy_field_name() {
        let req: RewriteRequest =
            serde_json::from_str(r#"{"orignal_file":"a","rewritten_code":"b"}"#).unwrap();
        assert_eq!(req.original_file, "a");
    }

    #[test]
    fn upload_request_requires_workspace() {
        let req = FileUploadRequest {
            email: "a@b.com".into(),
            filepath: String::new(),
            is_first_time: true,
        };
        assert!(req.validate().is_err());
    }
}
