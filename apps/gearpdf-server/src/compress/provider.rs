//! Compressor trait
//!
//! The seam between the service and whatever actually rewrites the PDF.

use std::path::Path;

use async_trait::async_trait;

use super::types::CompressionSettings;
use crate::error::ProcessingError;

/// Something that can rewrite a PDF at a reduced size
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Short name for logs and the health endpoint
    fn name(&self) -> &str;

    /// Check if the backend can be used right now
    async fn is_available(&self) -> bool;

    /// Read `input`, write the compressed document to `output`
    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        settings: &CompressionSettings,
    ) -> Result<(), ProcessingError>;
}
