//! PDF validation
//!
//! Cheap structural checks done before anything touches the disk. Readers
//! tolerate a little junk before the header and after the trailer, so both
//! markers are searched for within a window instead of at fixed offsets.

use super::types::{UploadedDocument, ACCEPTED_MEDIA_TYPES};
use crate::error::InvalidInputError;

/// Bytes from the start searched for `%PDF-`
pub const HEADER_WINDOW: usize = 1024;

/// Bytes from the end searched for `%%EOF`
pub const TRAILER_WINDOW: usize = 1024;

const PDF_HEADER: &[u8] = b"%PDF-";
const PDF_EOF: &[u8] = b"%%EOF";

/// Validate an upload against the size limit, its declared type and the PDF markers
pub fn validate_pdf(document: &UploadedDocument, max_bytes: usize) -> Result<(), InvalidInputError> {
    if document.len() > max_bytes {
        return Err(InvalidInputError::TooLarge { max: max_bytes });
    }

    if document.is_empty() {
        return Err(InvalidInputError::Empty);
    }

    check_media_type(document.content_type.as_deref())?;

    let data = &document.data;

    let head = &data[..data.len().min(HEADER_WINDOW)];
    if !contains(head, PDF_HEADER) {
        return Err(InvalidInputError::NotPdf);
    }

    let tail = &data[data.len().saturating_sub(TRAILER_WINDOW)..];
    if !contains(tail, PDF_EOF) {
        return Err(InvalidInputError::Truncated);
    }

    Ok(())
}

/// Accept a missing type or one of the PDF-compatible ones (parameters ignored)
pub fn check_media_type(content_type: Option<&str>) -> Result<(), InvalidInputError> {
    let Some(raw) = content_type else {
        return Ok(());
    };

    let essence = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if essence.is_empty() || ACCEPTED_MEDIA_TYPES.contains(&essence.as_str()) {
        Ok(())
    } else {
        Err(InvalidInputError::UnsupportedMediaType(raw.to_string()))
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
