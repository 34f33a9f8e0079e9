//! Compression Routes
//!
//! Endpoints:
//! - POST /compress
//! - POST /api/v1/compress
//!
//! The document arrives either as `multipart/form-data` (part `file` or
//! `pdf`, optional `profile` and `target_size_mb` parts) or as the raw
//! request body with the options in the query string.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State},
    http::{header, StatusCode},
    response::Response,
    routing::post,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{InvalidInputError, Result};
use crate::response;
use crate::state::AppState;
use crate::upload::{self, CompressOptions, UploadedDocument, Workspace};

/// Slack on top of the upload limit for multipart boundaries and text parts
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Query parameters for raw-body uploads
#[derive(Debug, Default, Deserialize)]
struct RawUploadQuery {
    profile: Option<String>,
    target_size_mb: Option<String>,
    filename: Option<String>,
}

/// Create the compression router
pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/compress", post(compress_pdf))
        .route("/api/v1/compress", post(compress_pdf))
        .layer(DefaultBodyLimit::max(max_upload_bytes.saturating_add(MULTIPART_OVERHEAD)))
}

/// POST /compress
///
/// Compress an uploaded PDF and stream the result back.
async fn compress_pdf(State(state): State<AppState>, request: Request) -> Result<Response> {
    let job_id = Uuid::new_v4();
    let settings = &state.config().compression;

    let (document, options) = read_upload(&state, request, settings.max_upload_bytes).await?;

    tracing::info!(
        job_id = %job_id,
        file_name = ?document.file_name,
        size = document.len(),
        "Compression requested"
    );

    upload::validate_pdf(&document, settings.max_upload_bytes)?;

    let profile = options.profile.unwrap_or(settings.default_profile);
    let workspace = Workspace::create(&settings.temp_dir, job_id).await?;
    workspace.write_input(&document.data).await?;

    let UploadedDocument { file_name, .. } = document;

    let job = workspace.job(profile, options.target_size);
    let result = state.compression().run(&job).await?;

    response::pdf_download(workspace, &result, file_name.as_deref(), job_id).await
}

/// Pull the document and its options out of either request shape
async fn read_upload(
    state: &AppState,
    request: Request,
    max_bytes: usize,
) -> Result<(UploadedDocument, CompressOptions)> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let is_multipart = content_type
        .as_deref()
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let multipart = Multipart::from_request(request, state)
            .await
            .map_err(|e| InvalidInputError::Malformed(e.body_text()))?;
        return read_multipart(multipart, max_bytes).await;
    }

    let query = Query::<RawUploadQuery>::try_from_uri(request.uri())
        .map(|Query(q)| q)
        .map_err(|e| InvalidInputError::Malformed(e.body_text()))?;

    let data = Bytes::from_request(request, state).await.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            InvalidInputError::TooLarge { max: max_bytes }
        } else {
            InvalidInputError::Malformed(e.body_text())
        }
    })?;

    let options = CompressOptions::parse(query.profile.as_deref(), query.target_size_mb.as_deref())?;
    let document = UploadedDocument::new(data)
        .with_file_name(query.filename)
        .with_content_type(content_type);

    Ok((document, options))
}

async fn read_multipart(
    mut multipart: Multipart,
    max_bytes: usize,
) -> Result<(UploadedDocument, CompressOptions)> {
    let mut document: Option<UploadedDocument> = None;
    let mut profile: Option<String> = None;
    let mut target_size_mb: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(e, max_bytes))? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" | "pdf" => {
                let file_name = field.file_name().map(|s| s.to_string());
                let content_type = field.content_type().map(|s| s.to_string());
                let data = field.bytes().await.map_err(|e| multipart_error(e, max_bytes))?;

                if data.len() > max_bytes {
                    return Err(InvalidInputError::TooLarge { max: max_bytes }.into());
                }

                tracing::debug!(
                    file_name = ?file_name,
                    content_type = ?content_type,
                    size = data.len(),
                    "Received file part"
                );

                document = Some(
                    UploadedDocument::new(data)
                        .with_file_name(file_name)
                        .with_content_type(content_type),
                );
            }
            "profile" => {
                profile = Some(field.text().await.map_err(|e| multipart_error(e, max_bytes))?);
            }
            "target_size_mb" => {
                target_size_mb = Some(field.text().await.map_err(|e| multipart_error(e, max_bytes))?);
            }
            other => {
                tracing::debug!(field = %other, "Ignoring unknown multipart field");
            }
        }
    }

    let document = document.ok_or(InvalidInputError::MissingFile)?;
    let options = CompressOptions::parse(profile.as_deref(), target_size_mb.as_deref())?;

    Ok((document, options))
}

fn multipart_error(e: axum::extract::multipart::MultipartError, max_bytes: usize) -> InvalidInputError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        InvalidInputError::TooLarge { max: max_bytes }
    } else {
        InvalidInputError::Malformed(e.body_text())
    }
}
