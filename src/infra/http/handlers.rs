use std::collections::BTreeMap;

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State, rejection::BytesRejection},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use markmap_api_types::{ArtifactListing, StoredFileView};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::application::error::ErrorReport;
use crate::domain::artifacts::ArtifactKind;

use super::HttpState;
use super::error::{ApiError, codes};

#[derive(Debug, Default, Deserialize)]
pub(super) struct SubmitQuery {
    label: Option<String>,
}

pub(super) async fn submit(
    State(state): State<HttpState>,
    Query(query): Query<SubmitQuery>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    const SOURCE: &str = "infra::http::submit";

    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                codes::PAYLOAD_TOO_LARGE,
                "Request body too large",
                None,
            )
        } else {
            ApiError::bad_request("Unreadable request body", Some(rejection.body_text()))
        }
    })?;

    let response = state
        .pipeline
        .submit(&body, query.label.as_deref())
        .await?;

    info!(
        target = SOURCE,
        base_name = %response.base_name,
        bytes = body.len(),
        png_pending = response.task_id.is_some(),
        "Artifact set ready"
    );

    Ok((StatusCode::OK, Json(response)).into_response())
}

pub(super) async fn get_artifact(
    State(state): State<HttpState>,
    Path(base_name): Path<String>,
) -> Result<Json<ArtifactListing>, ApiError> {
    let stored = state.pipeline.store().list_set(&base_name).await?;
    if stored.is_empty() {
        return Err(ApiError::not_found("Artifact not found"));
    }

    let links = state.pipeline.links();
    let files = stored
        .into_iter()
        .map(|file| {
            let view = StoredFileView {
                url: links.raw(&base_name, file.kind),
                file_name: file.file_name,
                size_bytes: file.size_bytes,
                modified_at: file.modified_at,
            };
            (file.kind.extension().to_string(), view)
        })
        .collect::<BTreeMap<_, _>>();

    Ok(Json(ArtifactListing { base_name, files }))
}

pub(super) async fn get_raw(
    State(state): State<HttpState>,
    Path((base_name, file_type)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let kind: ArtifactKind = file_type
        .parse()
        .map_err(|_| ApiError::not_found("Unknown file type"))?;
    let file_name = kind.file_name(&base_name);
    let bytes = state.pipeline.store().read_file(&file_name).await?;
    Ok(file_response(&file_name, bytes))
}

pub(super) async fn legacy_html(
    State(state): State<HttpState>,
    Path(file_name): Path<String>,
) -> Result<Response, ApiError> {
    let bytes = state.pipeline.store().read_file(&file_name).await?;
    Ok(file_response(&file_name, bytes))
}

pub(super) async fn get_task(
    State(state): State<HttpState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let task = Uuid::parse_str(&task_id)
        .ok()
        .and_then(|id| state.pipeline.tasks().get(id))
        .ok_or_else(|| ApiError::not_found("Task not found"))?;
    Ok(Json(task.view()).into_response())
}

pub(super) async fn healthz(State(state): State<HttpState>) -> Response {
    if state.pipeline.store().is_reachable().await {
        return StatusCode::NO_CONTENT.into_response();
    }

    let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
    ErrorReport::from_message(
        "infra::http::healthz",
        StatusCode::SERVICE_UNAVAILABLE,
        format!(
            "artifact store {} is not reachable",
            state.pipeline.store().root().display()
        ),
    )
    .attach(&mut response);
    response
}

fn file_response(file_name: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(file_name).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    // Files are immutable once written, but the png may still appear.
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    response
}
