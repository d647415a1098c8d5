use std::path::{Path, PathBuf};

use axum::Json;
use axum::extract::{Multipart, State};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use codementor_core::{
    FileUploadRequest, QueryRequest, QueryResponse, ResyncResponse, RewriteRequest, StreamEvent,
};
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::envelope::{ApiError, Envelope, QUERY_OK, RESYNC_OK};
use super::server::AppState;

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

pub(crate) async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Envelope<QueryResponse>, ApiError> {
    let response = state.orchestrator.query(&request).await?;
    Ok(Envelope::ok(response, QUERY_OK))
}

pub(crate) async fn stream_query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.orchestrator.stream_query(request);
    let events =
        ReceiverStream::new(rx).map(|event: StreamEvent| Event::default().json_data(event));
    Sse::new(events).keep_alive(KeepAlive::default())
}

pub(crate) async fn rewrite_handler(
    State(state): State<AppState>,
    Json(request): Json<RewriteRequest>,
) -> Result<Envelope<String>, ApiError> {
    let merged = state.rewriter.rewrite(&request).await?;
    Ok(Envelope::ok(merged, QUERY_OK))
}

#[derive(Default)]
struct UploadForm {
    file: Option<Vec<u8>>,
    email: Option<String>,
    filepath: Option<String>,
    is_first_time: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_owned();
            match name.as_str() {
                "file" => form.file = Some(field.bytes().await?.to_vec()),
                "email" => form.email = Some(field.text().await?),
                "filepath" => form.filepath = Some(field.text().await?),
                "is_first_time" => form.is_first_time = Some(field.text().await?),
                other => tracing::debug!(field = other, "ignoring unknown upload field"),
            }
        }
        Ok(form)
    }

    fn into_parts(self) -> Result<(Vec<u8>, FileUploadRequest), ApiError> {
        let missing = |name: &str| ApiError::invalid(format!("missing form field: {name}"));
        let file = self.file.ok_or_else(|| missing("file"))?;
        let flag = self.is_first_time.ok_or_else(|| missing("is_first_time"))?;
        let is_first_time = parse_flag(&flag)
            .ok_or_else(|| ApiError::invalid(format!("is_first_time is not a boolean: {flag}")))?;
        Ok((
            file,
            FileUploadRequest {
                email: self.email.ok_or_else(|| missing("email"))?,
                filepath: self.filepath.ok_or_else(|| missing("filepath"))?,
                is_first_time,
            },
        ))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

async fn stage_upload(dir: &Path, bytes: &[u8]) -> Result<PathBuf, ApiError> {
    let path = dir.join(format!("{}.json", uuid::Uuid::new_v4()));
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| ApiError::internal(format!("failed to store upload: {e}")))?;
    Ok(path)
}

pub(crate) async fn resync_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Envelope<ResyncResponse>, ApiError> {
    let (bytes, request) = UploadForm::read(multipart).await?.into_parts()?;
    let path = stage_upload(&state.upload_dir, &bytes).await?;
    let response = state.indexing.resync_upload(&path, request).await?;
    Ok(Envelope::ok(response, RESYNC_OK))
}
