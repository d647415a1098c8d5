use std::path::Path;
use std::sync::Arc;

use codementor_index::ResyncPipeline;

use crate::error::Result;
use crate::request::{FileUploadRequest, ResyncResponse};

/// Resync entry point for uploaded chunk files.
pub struct IndexingService {
    pipeline: Arc<ResyncPipeline>,
}

impl IndexingService {
    #[must_use]
    pub fn new(pipeline: Arc<ResyncPipeline>) -> Self {
        Self { pipeline }
    }

    /// Index the chunk file at `chunk_file` into the namespace of `request`.
    /// The file is removed on every exit path.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a malformed request, otherwise the resync failure.
    pub async fn resync_upload(
        &self,
        chunk_file: &Path,
        request: FileUploadRequest,
    ) -> Result<ResyncResponse> {
        if let Err(e) = request.validate() {
            if let Err(io) = tokio::fs::remove_file(chunk_file).await {
                tracing::warn!(path = %chunk_file.display(), error = %io, "failed to remove rejected upload");
            }
            return Err(e);
        }

        tracing::info!(
            workspace = %request.filepath,
            first_time = request.is_first_time,
            "resync requested"
        );
        let upsert_result = self
            .pipeline
            .resync_file(chunk_file, &request.email, &request.filepath)
            .await?;
        Ok(ResyncResponse {
            filepath: request.filepath.clone(),
            data: request,
            message: "Resynced successfully".into(),
            upsert_result,
        })
    }
}
