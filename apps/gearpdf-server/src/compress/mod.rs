//! PDF Compression
//!
//! Everything between a validated input file and a smaller output file:
//! - `Compressor` trait, the seam for the external tool
//! - Ghostscript implementation
//! - lopdf-based in-process pass, used as second stage and as fallback
//! - `CompressionService` with the timeout, concurrency limit and
//!   target-size search

pub mod ghostscript;
pub mod native;
pub mod provider;
pub mod service;
pub mod types;

pub use ghostscript::{GhostscriptCompressor, GS_CANDIDATES};
pub use native::NativeCompressor;
pub use provider::Compressor;
pub use service::CompressionService;
pub use types::*;
