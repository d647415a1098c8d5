use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IndexError, Result};

/// Contiguous span of source text produced by the upstream chunker.
///
/// Chunk files written by the chunker use `_id` and sometimes `code`
/// instead of `text`; both spellings are accepted. Unknown fields are kept
/// and carried into the vector metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(alias = "_id")]
    pub id: String,
    pub file_path: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub start_line: u64,
    #[serde(default)]
    pub end_line: u64,
    #[serde(alias = "code")]
    pub text: String,
    #[serde(default)]
    pub size: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Chunk {
    /// Every field except `id`, plus the insertion timestamp.
    #[must_use]
    pub fn metadata(&self, created_at: &str) -> Map<String, Value> {
        let mut metadata = self.extra.clone();
        metadata.insert("file_path".into(), Value::from(self.file_path.clone()));
        metadata.insert("file_name".into(), Value::from(self.file_name.clone()));
        metadata.insert("start_line".into(), Value::from(self.start_line));
        metadata.insert("end_line".into(), Value::from(self.end_line));
        metadata.insert("text".into(), Value::from(self.text.clone()));
        metadata.insert("size".into(), Value::from(self.size));
        metadata.insert("created_at".into(), Value::from(created_at));
        metadata
    }
}

/// Term-weighted lexical vector: parallel, ascending `indices` and `values`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product against another sparse vector. Both must be sorted by index.
    #[must_use]
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (mut i, mut j, mut sum) = (0, 0, 0.0);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// Persisted retrieval unit. Upserting an existing `id` replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub dense_values: Vec<f32>,
    pub sparse_values: SparseVector,
    pub metadata: Map<String, Value>,
}

impl VectorRecord {
    #[must_use]
    pub fn from_chunk(
        chunk: &Chunk,
        dense_values: Vec<f32>,
        sparse_values: SparseVector,
        created_at: &str,
    ) -> Self {
        Self {
            id: chunk.id.clone(),
            dense_values,
            sparse_values,
            metadata: chunk.metadata(created_at),
        }
    }
}

/// Vector store partition for one user and workspace: `{user}-{workspace}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// # Errors
    ///
    /// Returns `InvalidArgument` when either identity is blank.
    pub fn new(user_identity: &str, workspace_identity: &str) -> Result<Self> {
        if user_identity.trim().is_empty() {
            return Err(IndexError::InvalidArgument(
                "user identity must not be empty".into(),
            ));
        }
        if workspace_identity.trim().is_empty() {
            return Err(IndexError::InvalidArgument(
                "workspace identity must not be empty".into(),
            ));
        }
        Ok(Self(format!("{user_identity}-{workspace_identity}")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub score: f32,
    pub file_path: String,
    pub start_line: Option<u64>,
    pub end_line: Option<u64>,
    pub file_name: String,
}

impl DocumentMetadata {
    /// Read the known fields from stored metadata; missing names become `unknown`.
    #[must_use]
    pub fn from_stored(score: f32, metadata: &Map<String, Value>) -> Self {
        let text_field = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_owned()
        };
        Self {
            score,
            file_path: text_field("file_path"),
            start_line: metadata.get("start_line").and_then(Value::as_u64),
            end_line: metadata.get("end_line").and_then(Value::as_u64),
            file_name: text_field("file_name"),
        }
    }
}

/// Snippet handed to prompt construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub text: String,
    /// Reranker score, or `1.0` for file-expansion documents.
    pub relevance_score: f32,
    pub metadata: DocumentMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_accepts_underscore_id_and_code_field() {
        let raw = r#"{"_id":"c1","file_path":"src/a.py","file_name":"a.py",
            "start_line":3,"end_line":9,"code":"def a(): pass","size":13,"language":"python"}"#;
        let chunk: Chunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.id, "c1");
        assert_eq!(chunk.text, "def a(): pass");
        assert_eq!(chunk.extra.get("language"), Some(&Value::from("python")));
    }

    #[test]
    fn metadata_excludes_id_and_adds_timestamp() {
        let chunk: Chunk = serde_json::from_str(
            r#"{"id":"c1","file_path":"a.py","file_name":"a.py","start_line":1,"end_line":2,"text":"x","size":1}"#,
        )
        .unwrap();
        let metadata = chunk.metadata("2026-01-01 00:00:00");
        assert!(!metadata.contains_key("id"));
        assert_eq!(metadata["text"], "x");
        assert_eq!(metadata["created_at"], "2026-01-01 00:00:00");
        assert_eq!(metadata["start_line"], 1);
    }

    #[test]
    fn namespace_joins_identities() {
        let ns = Namespace::new("a@b.com", "ws1").unwrap();
        assert_eq!(ns.as_str(), "a@b.com-ws1");
        assert!(Namespace::new("", "ws1").is_err());
        assert!(Namespace::new("a@b.com", "  ").is_err());
    }

    #[test]
    fn missing_metadata_defaults_to_unknown() {
        let meta = DocumentMetadata::from_stored(0.5, &Map::new());
        assert_eq!(meta.file_path, "unknown");
        assert_eq!(meta.file_name, "unknown");
        assert!(meta.start_line.is_none());
    }

    #[test]
    fn sparse_dot_matches_shared_indices() {
        let a = SparseVector {
            indices: vec![1, 4, 9],
            values: vec![1.0, 2.0, 3.0],
        };
        let b = SparseVector {
            indices: vec![4, 9, 12],
            values: vec![0.5, 1.0, 7.0],
        };
        assert!((a.dot(&b) - 4.0).abs() < f32::EPSILON);
    }
}
