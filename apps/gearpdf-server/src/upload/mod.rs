//! File Intake
//!
//! Turns an upload into a validated input file:
//! - Size, media type and PDF marker checks
//! - Per-request workspace on disk
//!
//! Reading the HTTP body (multipart or raw) lives in `routes::compress`.

pub mod types;
pub mod validate;
pub mod workspace;

pub use types::*;
pub use validate::{check_media_type, validate_pdf};
pub use workspace::Workspace;
