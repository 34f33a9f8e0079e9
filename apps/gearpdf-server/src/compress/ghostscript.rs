//! Ghostscript compressor
//!
//! Runs `gs -sDEVICE=pdfwrite` as a child process. The child is killed when
//! the future driving it is dropped, so timeouts and client disconnects never
//! leave a stray process behind.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::provider::Compressor;
use super::types::CompressionSettings;
use crate::error::ProcessingError;

/// Binary names probed when none is configured
pub const GS_CANDIDATES: &[&str] = &["gs", "gswin64c", "gswin32c"];

/// Longest stderr excerpt carried in an error
const STDERR_EXCERPT_BYTES: usize = 2048;

pub struct GhostscriptCompressor {
    binary: String,
}

impl GhostscriptCompressor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Resolve the binary: the configured one if it runs, else the first
    /// candidate that answers `--version`.
    pub async fn detect(configured: Option<&str>) -> Option<Self> {
        if let Some(binary) = configured {
            return answers_version(binary).await.then(|| Self::new(binary));
        }

        for candidate in GS_CANDIDATES {
            if answers_version(candidate).await {
                return Some(Self::new(*candidate));
            }
        }
        None
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Command-line arguments for one run
    pub fn build_args(input: &Path, output: &Path, settings: &CompressionSettings) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-sDEVICE=pdfwrite".into(),
            "-dCompatibilityLevel=1.4".into(),
            format!("-dPDFSETTINGS={}", settings.profile.pdf_settings()).into(),
            "-dNOPAUSE".into(),
            "-dQUIET".into(),
            "-dBATCH".into(),
            "-dSAFER".into(),
        ];

        if let Some(dpi) = settings.image_dpi {
            for kind in ["Color", "Gray", "Mono"] {
                args.push(format!("-dDownsample{}Images=true", kind).into());
                args.push(format!("-d{}ImageResolution={}", kind, dpi).into());
            }
        }

        let mut output_arg = OsString::from("-sOutputFile=");
        output_arg.push(output.as_os_str());
        args.push(output_arg);
        args.push(input.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl Compressor for GhostscriptCompressor {
    fn name(&self) -> &str {
        "ghostscript"
    }

    async fn is_available(&self) -> bool {
        answers_version(&self.binary).await
    }

    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        settings: &CompressionSettings,
    ) -> Result<(), ProcessingError> {
        let child = Command::new(&self.binary)
            .args(Self::build_args(input, output, settings))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    ProcessingError::Unavailable(format!("{} not found", self.binary))
                }
                _ => ProcessingError::Spawn(e.to_string()),
            })?;

        tracing::debug!(
            binary = %self.binary,
            profile = %settings.profile,
            dpi = ?settings.image_dpi,
            pid = ?child.id(),
            "Ghostscript started"
        );

        let result = child
            .wait_with_output()
            .await
            .map_err(|e| ProcessingError::Spawn(e.to_string()))?;

        if !result.status.success() {
            return Err(ProcessingError::Failed {
                code: result.status.code(),
                stderr: stderr_excerpt(&result.stderr),
            });
        }

        Ok(())
    }
}

async fn answers_version(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_EXCERPT_BYTES {
        return text.to_string();
    }

    let mut end = STDERR_EXCERPT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
