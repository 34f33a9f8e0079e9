//! In-process compressor
//!
//! Rewrites the PDF with lopdf: raster images are optionally scaled and
//! re-encoded as JPEG, unreferenced objects are pruned and every unfiltered
//! stream is Flate-compressed. Used after Ghostscript when its best output is
//! still above the target, and instead of it when Ghostscript is missing.

use std::path::Path;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use lopdf::{Dictionary, Document, Object, Stream};

use super::provider::Compressor;
use super::types::{CompressionSettings, ImageRecompression};
use crate::error::ProcessingError;

/// Images scaled below this many pixels per side are left alone
const MIN_IMAGE_SIDE: u32 = 10;

#[derive(Debug, Default)]
pub struct NativeCompressor;

impl NativeCompressor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Compressor for NativeCompressor {
    fn name(&self) -> &str {
        "native"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        settings: &CompressionSettings,
    ) -> Result<(), ProcessingError> {
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        let images = settings.images;

        tokio::task::spawn_blocking(move || rewrite(&input, &output, images))
            .await
            .map_err(|e| ProcessingError::Rewrite(e.to_string()))?
    }
}

/// Load `input`, shrink it and save the result to `output`
pub fn rewrite(input: &Path, output: &Path, images: Option<ImageRecompression>) -> Result<(), ProcessingError> {
    let mut doc = Document::load(input).map_err(|e| ProcessingError::Rewrite(e.to_string()))?;

    let recompressed = match images {
        Some(step) => downsample_images(&mut doc, step),
        None => 0,
    };

    doc.prune_objects();
    doc.delete_zero_length_streams();
    doc.compress();

    doc.save(output).map_err(|e| ProcessingError::Rewrite(e.to_string()))?;

    tracing::debug!(
        images = recompressed,
        scale = images.map(|s| s.scale_percent),
        quality = images.map(|s| s.quality),
        "PDF rewritten"
    );
    Ok(())
}

/// Re-encode every image XObject the pass understands; returns how many changed.
///
/// Each image object is visited once, so images shared between pages are
/// converted a single time.
fn downsample_images(doc: &mut Document, step: ImageRecompression) -> usize {
    let mut count = 0;

    for (id, object) in doc.objects.iter_mut() {
        let Object::Stream(stream) = object else {
            continue;
        };
        if !is_image(&stream.dict) {
            continue;
        }

        match recompress_image(stream, step) {
            Ok(true) => count += 1,
            Ok(false) => {}
            Err(e) => tracing::debug!(object = ?id, "Skipping image: {}", e),
        }
    }

    count
}

fn is_image(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype"), Ok(Object::Name(name)) if name.as_slice() == b"Image")
}

fn name_of<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match dict.get(key) {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        _ => None,
    }
}

/// Filter names in application order (a single name or an array of them)
fn filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Object::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Replace the image in `stream` with a scaled JPEG when that is smaller.
/// `Ok(false)` means the image was left as it was.
fn recompress_image(stream: &mut Stream, step: ImageRecompression) -> Result<bool, String> {
    let dict = &stream.dict;

    if matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true))) {
        return Ok(false);
    }

    let gray = match name_of(dict, b"ColorSpace") {
        Some(b"DeviceGray") => true,
        Some(b"DeviceRGB") => false,
        _ => return Ok(false),
    };

    let width = dict.get(b"Width").and_then(Object::as_i64).map_err(|e| e.to_string())?;
    let height = dict.get(b"Height").and_then(Object::as_i64).map_err(|e| e.to_string())?;
    let (width, height) = match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(format!("bad dimensions {}x{}", width, height)),
    };

    let scale = |side: u32| (u64::from(side) * u64::from(step.scale_percent) / 100) as u32;
    let (new_width, new_height) = (scale(width), scale(height));
    if new_width < MIN_IMAGE_SIDE || new_height < MIN_IMAGE_SIDE {
        return Ok(false);
    }

    let filters = filters(dict);
    let decoded = match filters.as_slice() {
        [f] if f.as_slice() == b"DCTDecode" => {
            image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg)
                .map_err(|e| e.to_string())?
        }
        [] | [_] if dict.get(b"DecodeParms").is_err() => {
            if !matches!(dict.get(b"BitsPerComponent").and_then(Object::as_i64), Ok(8)) {
                return Ok(false);
            }
            let samples = match filters.first() {
                None => stream.content.clone(),
                Some(f) if f.as_slice() == b"FlateDecode" => {
                    stream.decompressed_content().map_err(|e| e.to_string())?
                }
                Some(_) => return Ok(false),
            };
            raw_image(samples, width, height, gray)?
        }
        _ => return Ok(false),
    };

    let resized = if (new_width, new_height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(new_width, new_height, FilterType::Lanczos3)
    };
    let resized = if gray {
        DynamicImage::ImageLuma8(resized.to_luma8())
    } else {
        DynamicImage::ImageRgb8(resized.to_rgb8())
    };

    let mut jpeg = Vec::new();
    resized
        .write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, step.quality))
        .map_err(|e| e.to_string())?;

    if jpeg.len() >= stream.content.len() {
        return Ok(false);
    }

    let dict = &mut stream.dict;
    dict.set("Width", i64::from(new_width));
    dict.set("Height", i64::from(new_height));
    dict.set("ColorSpace", if gray { "DeviceGray" } else { "DeviceRGB" });
    dict.set("BitsPerComponent", 8);
    dict.set("Filter", "DCTDecode");
    dict.remove(b"DecodeParms");
    dict.remove(b"Decode");
    stream.set_content(jpeg);
    stream.allows_compression = false;

    Ok(true)
}

/// Wrap 8-bit samples in an image buffer
fn raw_image(samples: Vec<u8>, width: u32, height: u32, gray: bool) -> Result<DynamicImage, String> {
    let image = if gray {
        image::GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8)
    } else {
        image::RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8)
    };
    image.ok_or_else(|| "sample data does not match dimensions".to_string())
}
