//! Response Emitter
//!
//! Streams a compressed PDF back to the client. The body stream owns the
//! job's [`Workspace`], so the temporary files disappear as soon as the last
//! chunk is sent or the client goes away.

use std::io;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use futures::Stream;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use crate::compress::CompressedDocument;
use crate::error::{AppError, Result};
use crate::upload::Workspace;

/// Read size for the streamed body
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Name used when the upload had none
pub const DEFAULT_DOWNLOAD_NAME: &str = "compressed.pdf";

pub const X_ORIGINAL_SIZE: HeaderName = HeaderName::from_static("x-original-size");
pub const X_COMPRESSED_SIZE: HeaderName = HeaderName::from_static("x-compressed-size");
pub const X_COMPRESSION_PROFILE: HeaderName = HeaderName::from_static("x-compression-profile");
pub const X_COMPRESSION_DPI: HeaderName = HeaderName::from_static("x-compression-dpi");
pub const X_JOB_ID: HeaderName = HeaderName::from_static("x-job-id");

/// Build the download response for a finished job
pub async fn pdf_download(
    workspace: Workspace,
    document: &CompressedDocument,
    file_name: Option<&str>,
    job_id: Uuid,
) -> Result<Response> {
    let file = File::open(&document.path).await?;
    let length = file.metadata().await?.len();

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(header::CONTENT_LENGTH, length)
        .header(header::CONTENT_DISPOSITION, content_disposition(file_name))
        .header(header::CACHE_CONTROL, "no-store")
        .header(X_ORIGINAL_SIZE, document.original_size)
        .header(X_COMPRESSED_SIZE, document.compressed_size)
        .header(X_COMPRESSION_PROFILE, document.profile.as_str())
        .header(X_JOB_ID, job_id.to_string());

    // A passthrough body was never downsampled
    if let (Some(dpi), false) = (document.dpi, document.kept_original) {
        builder = builder.header(X_COMPRESSION_DPI, dpi);
    }

    builder
        .body(Body::from_stream(file_stream(file, workspace)))
        .map_err(|e| AppError::Io(io::Error::new(io::ErrorKind::Other, e)))
}

/// Chunked reader over `file` that drops `workspace` once exhausted or dropped
pub fn file_stream(file: File, workspace: Workspace) -> impl Stream<Item = io::Result<Bytes>> + Send {
    futures::stream::try_unfold((file, workspace), |(mut file, workspace)| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let read = file.read(&mut buf).await?;
        if read == 0 {
            tracing::debug!(job_id = %workspace.id(), "Response body sent");
            return Ok::<_, io::Error>(None);
        }
        buf.truncate(read);
        Ok(Some((Bytes::from(buf), (file, workspace))))
    })
}

/// Output name derived from the upload: `report.pdf` becomes `report-compressed.pdf`
pub fn download_name(file_name: Option<&str>) -> String {
    let stem = file_name
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name))
        .map(|name| strip_pdf_extension(name).trim())
        .filter(|stem| !stem.is_empty());

    match stem {
        Some(stem) => format!("{}-compressed.pdf", stem),
        None => DEFAULT_DOWNLOAD_NAME.to_string(),
    }
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name
pub fn content_disposition(file_name: Option<&str>) -> HeaderValue {
    let name = download_name(file_name);
    let fallback: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(&name)
    );

    HeaderValue::from_str(&value).unwrap_or_else(|_| {
        HeaderValue::from_static("attachment; filename=\"compressed.pdf\"")
    })
}

fn strip_pdf_extension(name: &str) -> &str {
    let len = name.len();
    if len >= 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".pdf") {
        &name[..len - 4]
    } else {
        name
    }
}
