//! Compression types

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InvalidInputError;

// ============================================================================
// Constants
// ============================================================================

/// First image resolution tried by the target-size search
pub const DPI_START: u32 = 200;

/// Lowest image resolution the target-size search may go to
pub const DPI_MIN: u32 = 72;

/// Resolution decrement between search attempts
pub const DPI_STEP: u32 = 25;

/// Resolutions tried by the target-size search for `profile`, highest first.
/// Steps above the preset's own image resolution are skipped, so the search
/// never asks for more detail than the preset would keep.
pub fn dpi_ladder(profile: CompressionProfile) -> Vec<u32> {
    let cap = profile.image_dpi().unwrap_or(DPI_START);
    (0..)
        .map(|i| DPI_START.saturating_sub(i * DPI_STEP))
        .take_while(|dpi| *dpi >= DPI_MIN)
        .filter(|dpi| *dpi <= cap)
        .collect()
}

/// (scale percent, JPEG quality) steps of the in-process image pass, mildest first
#[rustfmt::skip]
pub const IMAGE_LADDER: &[(u32, u8)] = &[
    (100, 95), (100, 90), (100, 85), (100, 80), (100, 75), (100, 70),
    (90, 70), (85, 70), (80, 70), (80, 65), (80, 60), (75, 60),
    (70, 60), (65, 60), (60, 60), (55, 55), (50, 50), (45, 50),
    (40, 50), (35, 45), (30, 40), (25, 40),
];

/// Where to enter [`IMAGE_LADDER`]: far-off targets skip the mildest steps
pub fn image_ladder_start(current_size: u64, target_size: u64) -> usize {
    let ratio = current_size as f64 / target_size.max(1) as f64;
    if ratio > 5.0 {
        9
    } else if ratio > 2.0 {
        3
    } else {
        0
    }
}

// ============================================================================
// Profile
// ============================================================================

/// Ghostscript quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionProfile {
    /// Low resolution, smallest output
    Screen,
    /// Medium resolution
    #[default]
    Ebook,
    /// High resolution for printing
    Printer,
    /// Print-ready, colour preserving
    Prepress,
    /// Ghostscript's general-purpose preset
    Default,
}

impl CompressionProfile {
    pub const ALL: [CompressionProfile; 5] = [
        Self::Screen,
        Self::Ebook,
        Self::Printer,
        Self::Prepress,
        Self::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Screen => "screen",
            Self::Ebook => "ebook",
            Self::Printer => "printer",
            Self::Prepress => "prepress",
            Self::Default => "default",
        }
    }

    /// Image resolution the preset downsamples to, if it has a fixed one
    pub fn image_dpi(&self) -> Option<u32> {
        match self {
            Self::Screen => Some(72),
            Self::Ebook => Some(150),
            Self::Printer | Self::Prepress => Some(300),
            Self::Default => None,
        }
    }

    /// Value for Ghostscript's `-dPDFSETTINGS`
    pub fn pdf_settings(&self) -> &'static str {
        match self {
            Self::Screen => "/screen",
            Self::Ebook => "/ebook",
            Self::Printer => "/printer",
            Self::Prepress => "/prepress",
            Self::Default => "/default",
        }
    }
}

impl fmt::Display for CompressionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionProfile {
    type Err = InvalidInputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_start_matches('/');
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| InvalidInputError::UnknownProfile(s.to_string()))
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Image re-encoding done by the in-process pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRecompression {
    /// New width and height as a percentage of the current ones
    pub scale_percent: u32,
    /// JPEG quality, 1-100
    pub quality: u8,
}

impl From<(u32, u8)> for ImageRecompression {
    fn from((scale_percent, quality): (u32, u8)) -> Self {
        Self { scale_percent, quality }
    }
}

/// Parameters for a single run of a compressor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSettings {
    pub profile: CompressionProfile,
    /// Forces image downsampling to this resolution when set
    pub image_dpi: Option<u32>,
    /// Re-encode raster images this way (in-process pass only)
    pub images: Option<ImageRecompression>,
}

impl CompressionSettings {
    pub fn new(profile: CompressionProfile) -> Self {
        Self {
            profile,
            image_dpi: None,
            images: None,
        }
    }

    pub fn with_dpi(profile: CompressionProfile, dpi: u32) -> Self {
        Self {
            image_dpi: Some(dpi),
            ..Self::new(profile)
        }
    }

    pub fn with_images(profile: CompressionProfile, images: ImageRecompression) -> Self {
        Self {
            images: Some(images),
            ..Self::new(profile)
        }
    }
}

// ============================================================================
// Job
// ============================================================================

/// One compression request, alive for the duration of the HTTP request
#[derive(Debug, Clone)]
pub struct CompressionJob {
    pub id: Uuid,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub profile: CompressionProfile,
    /// Stop the DPI search once the output is at most this many bytes
    pub target_size: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl CompressionJob {
    pub fn new(
        id: Uuid,
        input_path: PathBuf,
        output_path: PathBuf,
        profile: CompressionProfile,
        target_size: Option<u64>,
    ) -> Self {
        Self {
            id,
            input_path,
            output_path,
            profile,
            target_size,
            created_at: Utc::now(),
        }
    }

    /// Scratch file for one attempt of the DPI search
    pub fn attempt_path(&self, dpi: u32) -> PathBuf {
        self.scratch_path(&format!("attempt-{}dpi", dpi))
    }

    /// `<name>.pdf` next to the output file
    pub fn scratch_path(&self, name: &str) -> PathBuf {
        let dir = self.output_path.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!("{}.pdf", name))
    }
}

// ============================================================================
// Result
// ============================================================================

/// Outcome of a compression job
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedDocument {
    /// File to send back (the input itself when `kept_original`)
    #[serde(skip)]
    pub path: PathBuf,
    pub original_size: u64,
    pub compressed_size: u64,
    pub profile: CompressionProfile,
    /// Resolution that produced the result, when the DPI search ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dpi: Option<u32>,
    /// Compression did not shrink the file, so the upload is returned as is
    pub kept_original: bool,
}

impl CompressedDocument {
    /// Size reduction in percent (0 when nothing was saved)
    pub fn reduction_percent(&self) -> f64 {
        if self.original_size == 0 || self.compressed_size >= self.original_size {
            return 0.0;
        }
        (1.0 - self.compressed_size as f64 / self.original_size as f64) * 100.0
    }
}
