//! Upload types

use axum::body::Bytes;

use crate::compress::CompressionProfile;
use crate::error::InvalidInputError;

/// Media types accepted for a PDF upload
pub const ACCEPTED_MEDIA_TYPES: &[&str] = &[
    "application/pdf",
    "application/x-pdf",
    "application/octet-stream",
];

/// A document as received, before validation
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub data: Bytes,
    /// Name the client gave the file, if any
    pub file_name: Option<String>,
    /// Content type the client declared, if any
    pub content_type: Option<String>,
}

impl UploadedDocument {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            file_name: None,
            content_type: None,
        }
    }

    pub fn with_file_name(mut self, file_name: Option<String>) -> Self {
        self.file_name = file_name.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Request parameters that shape the compression
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompressOptions {
    pub profile: Option<CompressionProfile>,
    /// Target size in bytes
    pub target_size: Option<u64>,
}

impl CompressOptions {
    /// Parse the raw form/query values; blank values count as absent.
    pub fn parse(profile: Option<&str>, target_size_mb: Option<&str>) -> Result<Self, InvalidInputError> {
        let profile = match profile.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => Some(name.parse::<CompressionProfile>()?),
            None => None,
        };

        let target_size = match target_size_mb.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(parse_target_mb(raw)?),
            None => None,
        };

        Ok(Self {
            profile,
            target_size,
        })
    }
}

fn parse_target_mb(raw: &str) -> Result<u64, InvalidInputError> {
    let mb: f64 = raw
        .parse()
        .map_err(|_| InvalidInputError::InvalidTargetSize(raw.to_string()))?;

    if !mb.is_finite() || mb <= 0.0 {
        return Err(InvalidInputError::InvalidTargetSize(raw.to_string()));
    }

    Ok((mb * 1024.0 * 1024.0) as u64)
}
