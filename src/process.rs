//! Image post-processing: bounding-box resize/recompression and file format
//! conversion, including multi-resolution ICO packing and the HEIC/HEIF
//! family.
//!
//! Both operations share one decoding step into a pixel buffer; each output
//! format is bound to its own encoding strategy through the format enums, so
//! unrecognized tags never reach the encoders.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::ico::{IcoEncoder, IcoFrame};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::decode::ImageResult;
use crate::error::{Error, Result, ValidationError, validation_failure};
use crate::output::write_atomic;

/// Default quality for resized jpeg/webp output.
pub const DEFAULT_RESIZE_QUALITY: u8 = 85;

/// Default quality for converted jpeg/webp/heif output.
pub const DEFAULT_CONVERT_QUALITY: u8 = 90;

/// Default icon sizes when converting to ICO without an explicit list.
pub const DEFAULT_ICO_SIZES: &[u32] = &[16, 32, 48, 64, 128];

/// Largest bitmap dimension an ICO directory entry can describe.
pub const MAX_ICO_SIZE: u32 = 256;

// =============================================================================
// Format enums
// =============================================================================

/// Output format for resize/recompression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG (lossless; quality is ignored)
    Png,
    /// JPEG (lossy; quality 1-100)
    Jpeg,
    /// WebP (lossy; quality 1-100)
    Webp,
}

impl OutputFormat {
    /// MIME type of the format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
        }
    }

    /// Filename extension, without leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Webp => "webp",
        }
    }

    /// Map a MIME type back to a format.
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        match mime_type.to_ascii_lowercase().as_str() {
            "image/png" => Some(OutputFormat::Png),
            "image/jpeg" => Some(OutputFormat::Jpeg),
            "image/webp" => Some(OutputFormat::Webp),
            _ => None,
        }
    }
}

/// Target format for file conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    /// PNG
    Png,
    /// JPEG
    Jpeg,
    /// WebP
    Webp,
    /// HEIC (requires the `heif` feature)
    Heic,
    /// HEIF (requires the `heif` feature)
    Heif,
    /// Multi-resolution icon container
    Ico,
}

impl TargetFormat {
    /// MIME type of the format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            TargetFormat::Png => "image/png",
            TargetFormat::Jpeg => "image/jpeg",
            TargetFormat::Webp => "image/webp",
            TargetFormat::Heic => "image/heic",
            TargetFormat::Heif => "image/heif",
            TargetFormat::Ico => "image/x-icon",
        }
    }

    /// Filename extension, without leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Png => "png",
            TargetFormat::Jpeg => "jpg",
            TargetFormat::Webp => "webp",
            TargetFormat::Heic => "heic",
            TargetFormat::Heif => "heif",
            TargetFormat::Ico => "ico",
        }
    }

    /// Whether a path extension already matches this format.
    fn matches_extension(&self, extension: &str) -> bool {
        let extension = extension.to_ascii_lowercase();
        match self {
            TargetFormat::Jpeg => extension == "jpg" || extension == "jpeg",
            other => extension == other.extension(),
        }
    }
}

// =============================================================================
// Specs
// =============================================================================

/// Bounding-box resize/recompression parameters.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ResizeSpec {
    /// Maximum output width in pixels.
    pub max_width: u32,

    /// Maximum output height in pixels.
    pub max_height: u32,

    /// Output format. When absent, the source format is kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,

    /// Quality (1-100) for jpeg/webp output. Defaults to 85; ignored for png.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

impl ResizeSpec {
    /// Create a spec that fits within the given bounds, keeping the source
    /// format.
    pub fn bounds(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width,
            max_height,
            format: None,
            quality: None,
        }
    }

    /// Validate the parameters.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.max_width == 0 {
            errors.push(ValidationError::new("max_width", "max_width must be a positive integer"));
        }
        if self.max_height == 0 {
            errors.push(ValidationError::new("max_height", "max_height must be a positive integer"));
        }
        if let Some(quality) = self.quality {
            if !(1..=100).contains(&quality) {
                errors.push(ValidationError::new(
                    "quality",
                    format!("quality must be between 1 and 100, got {quality}"),
                ));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn effective_quality(&self) -> u8 {
        self.quality.unwrap_or(DEFAULT_RESIZE_QUALITY)
    }
}

/// File conversion parameters.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ConversionSpec {
    /// Format to convert to.
    pub target_format: TargetFormat,

    /// Icon sizes for ICO targets. Defaults to 16, 32, 48, 64, 128.
    /// Ignored for other targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ico_sizes: Option<Vec<u32>>,
}

impl ConversionSpec {
    /// Create a spec for the given target with default settings.
    pub fn to(target_format: TargetFormat) -> Self {
        Self {
            target_format,
            ico_sizes: None,
        }
    }

    /// Validate the parameters.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Some(sizes) = &self.ico_sizes {
            if sizes.is_empty() {
                errors.push(ValidationError::new("ico_sizes", "ico_sizes must contain at least one size"));
            }
            for &size in sizes {
                if size == 0 {
                    errors.push(ValidationError::new("ico_sizes", "icon sizes must be positive integers"));
                } else if size > MAX_ICO_SIZE {
                    errors.push(ValidationError::new(
                        "ico_sizes",
                        format!("icon size {size} exceeds the ICO maximum of {MAX_ICO_SIZE}"),
                    ));
                }
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Icon sizes to pack, sorted ascending with duplicates removed.
    pub fn normalized_ico_sizes(&self) -> Vec<u32> {
        let mut sizes = self
            .ico_sizes
            .clone()
            .unwrap_or_else(|| DEFAULT_ICO_SIZES.to_vec());
        sizes.sort_unstable();
        sizes.dedup();
        sizes
    }
}

// =============================================================================
// Resize
// =============================================================================

/// Resize an image to fit within the spec's bounds and re-encode it.
///
/// The scale factor is `min(max_width/width, max_height/height)`; a factor of
/// 1 or more leaves the dimensions untouched; this operation only ever
/// scales down. The output MIME type and extension follow the chosen output
/// format, overriding the input's.
///
/// # Errors
/// - `Error::Validation` for non-positive bounds or an out-of-range quality
/// - `Error::Decode` when the source bytes cannot be decoded or re-encoded
#[instrument(level = "debug", name = "resize_image", skip(image), fields(max_width = spec.max_width, max_height = spec.max_height))]
pub fn resize(image: &ImageResult, spec: &ResizeSpec) -> Result<ImageResult> {
    spec.validate().map_err(validation_failure)?;

    let decoded = image::load_from_memory(&image.bytes)
        .map_err(|e| Error::decode(format!("unable to decode source image: {e}")))?;

    let (width, height) = (decoded.width(), decoded.height());
    let scale = f64::min(
        spec.max_width as f64 / width as f64,
        spec.max_height as f64 / height as f64,
    );

    let output = if scale >= 1.0 {
        decoded
    } else {
        let new_width = ((width as f64 * scale).round() as u32).max(1);
        let new_height = ((height as f64 * scale).round() as u32).max(1);
        debug!(width, height, new_width, new_height, "Scaling down");
        decoded.resize_exact(new_width, new_height, FilterType::Lanczos3)
    };

    let format = spec
        .format
        .or_else(|| OutputFormat::from_mime_type(&image.mime_type))
        .unwrap_or(OutputFormat::Png);

    let bytes = encode_pixels(&output, format, spec.effective_quality()).map_err(Error::decode)?;

    Ok(ImageResult {
        bytes,
        mime_type: format.mime_type().to_string(),
        extension: format!(".{}", format.extension()),
        model_used: image.model_used.clone(),
    })
}

// =============================================================================
// Convert
// =============================================================================

/// Convert an image file to another format.
///
/// Reads and decodes `source_path` (common raster formats, plus HEIC/HEIF
/// sources under the `heif` feature), re-encodes at the target's default
/// quality, and writes the result to `target_path`, with the extension
/// corrected to the target format when it disagrees. ICO targets pack one
/// square bitmap per requested size into a single container, built fully in
/// memory before one write.
///
/// # Errors
/// - `Error::Validation` for invalid icon sizes
/// - `Error::Io` naming the path for read/write failures
/// - `Error::Conversion` naming the source path for decode/encode failures
#[instrument(level = "info", name = "convert_image", skip_all, fields(target_format = ?spec.target_format))]
pub async fn convert(
    source_path: impl AsRef<Path>,
    target_path: impl AsRef<Path>,
    spec: &ConversionSpec,
) -> Result<ImageResult> {
    spec.validate().map_err(validation_failure)?;

    let source = source_path.as_ref();
    let data = tokio::fs::read(source).await.map_err(|e| Error::io(source, e))?;
    let decoded = decode_raster(source, &data)?;

    let format = spec.target_format;
    let bytes = match format {
        TargetFormat::Ico => {
            let sizes = spec.normalized_ico_sizes();
            pack_ico(&decoded, &sizes).map_err(|e| Error::conversion(source, e))?
        }
        TargetFormat::Png => encode_pixels(&decoded, OutputFormat::Png, DEFAULT_CONVERT_QUALITY)
            .map_err(|e| Error::conversion(source, e))?,
        TargetFormat::Jpeg => encode_pixels(&decoded, OutputFormat::Jpeg, DEFAULT_CONVERT_QUALITY)
            .map_err(|e| Error::conversion(source, e))?,
        TargetFormat::Webp => encode_pixels(&decoded, OutputFormat::Webp, DEFAULT_CONVERT_QUALITY)
            .map_err(|e| Error::conversion(source, e))?,
        TargetFormat::Heic | TargetFormat::Heif => {
            encode_heif_bytes(source, &decoded, DEFAULT_CONVERT_QUALITY)?
        }
    };

    let target = corrected_target_path(target_path.as_ref(), format);
    write_atomic(&target, &bytes).await?;
    info!(
        source = %source.display(),
        target = %target.display(),
        size = bytes.len(),
        "Converted image"
    );

    Ok(ImageResult {
        bytes,
        mime_type: format.mime_type().to_string(),
        extension: format!(".{}", format.extension()),
        model_used: None,
    })
}

/// Correct a target path's extension to match the target format.
pub fn corrected_target_path(target: &Path, format: TargetFormat) -> PathBuf {
    match target.extension().and_then(|e| e.to_str()) {
        Some(extension) if format.matches_extension(extension) => target.to_path_buf(),
        _ => target.with_extension(format.extension()),
    }
}

/// Decode raster bytes, routing HEIC/HEIF sources through libheif.
fn decode_raster(path: &Path, data: &[u8]) -> Result<DynamicImage> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if extension == "heic" || extension == "heif" {
        return decode_heif_bytes(path, data);
    }

    image::load_from_memory(data)
        .map_err(|e| Error::conversion(path, format!("unable to decode image: {e}")))
}

#[cfg(feature = "heif")]
fn decode_heif_bytes(path: &Path, data: &[u8]) -> Result<DynamicImage> {
    heif::decode(data).map_err(|e| Error::conversion(path, e))
}

#[cfg(not(feature = "heif"))]
fn decode_heif_bytes(path: &Path, _data: &[u8]) -> Result<DynamicImage> {
    Err(Error::conversion(
        path,
        "HEIC/HEIF support requires building with the `heif` feature",
    ))
}

#[cfg(feature = "heif")]
fn encode_heif_bytes(source: &Path, image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    heif::encode(image, quality).map_err(|e| Error::conversion(source, e))
}

#[cfg(not(feature = "heif"))]
fn encode_heif_bytes(source: &Path, _image: &DynamicImage, _quality: u8) -> Result<Vec<u8>> {
    Err(Error::conversion(
        source,
        "HEIC/HEIF support requires building with the `heif` feature",
    ))
}

// =============================================================================
// Encoders
// =============================================================================

/// Encode a pixel buffer in the given format.
fn encode_pixels(
    image: &DynamicImage,
    format: OutputFormat,
    quality: u8,
) -> std::result::Result<Vec<u8>, String> {
    match format {
        OutputFormat::Png => {
            let mut cursor = Cursor::new(Vec::new());
            image
                .write_to(&mut cursor, ImageFormat::Png)
                .map_err(|e| format!("unable to encode png: {e}"))?;
            Ok(cursor.into_inner())
        }
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = image.to_rgb8();
            let mut buffer = Vec::new();
            JpegEncoder::new_with_quality(&mut buffer, quality)
                .encode_image(&rgb)
                .map_err(|e| format!("unable to encode jpeg: {e}"))?;
            Ok(buffer)
        }
        OutputFormat::Webp => {
            let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
            let encoder = webp::Encoder::from_image(&rgba)
                .map_err(|e| format!("unable to encode webp: {e}"))?;
            Ok(encoder.encode(quality as f32).to_vec())
        }
    }
}

/// Pack one square bitmap per size into a single ICO container.
///
/// Sizes are assumed sorted ascending and deduplicated, so the largest frame
/// lands last in the directory. Icon slots are square; the fit is
/// non-aspect-preserving, and upscaling small sources is permitted.
fn pack_ico(image: &DynamicImage, sizes: &[u32]) -> std::result::Result<Vec<u8>, String> {
    let mut encoded_frames = Vec::with_capacity(sizes.len());
    for &size in sizes {
        let frame = image.resize_exact(size, size, FilterType::Lanczos3).to_rgba8();
        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(frame.as_raw(), size, size, ExtendedColorType::Rgba8)
            .map_err(|e| format!("unable to encode {size}x{size} icon bitmap: {e}"))?;
        encoded_frames.push((png, size));
    }

    let frames = encoded_frames
        .iter()
        .map(|(png, size)| IcoFrame::as_png(png, *size, *size, ExtendedColorType::Rgba8))
        .collect::<image::ImageResult<Vec<_>>>()
        .map_err(|e| format!("unable to build icon frame: {e}"))?;

    let mut container = Vec::new();
    IcoEncoder::new(&mut container)
        .encode_images(&frames)
        .map_err(|e| format!("unable to pack icon container: {e}"))?;
    Ok(container)
}

#[cfg(feature = "heif")]
mod heif {
    //! HEIC/HEIF decode and encode through libheif.

    use image::{DynamicImage, RgbaImage};
    use libheif_rs::{
        Channel, ColorSpace, CompressionFormat, EncoderQuality, HeifContext, Image, LibHeif,
        RgbChroma,
    };

    pub(super) fn decode(data: &[u8]) -> Result<DynamicImage, String> {
        let lib_heif = LibHeif::new();
        let context = HeifContext::read_from_bytes(data)
            .map_err(|e| format!("unable to read HEIF container: {e}"))?;
        let handle = context
            .primary_image_handle()
            .map_err(|e| format!("no primary image in HEIF container: {e}"))?;
        let decoded = lib_heif
            .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgba), None)
            .map_err(|e| format!("unable to decode HEIF image: {e}"))?;

        let width = decoded.width();
        let height = decoded.height();
        let planes = decoded.planes();
        let interleaved = planes
            .interleaved
            .ok_or_else(|| "HEIF decode produced no interleaved plane".to_string())?;

        let row_len = width as usize * 4;
        let mut pixels = Vec::with_capacity(row_len * height as usize);
        for row in 0..height as usize {
            let start = row * interleaved.stride;
            pixels.extend_from_slice(&interleaved.data[start..start + row_len]);
        }

        RgbaImage::from_raw(width, height, pixels)
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| "HEIF decode produced a malformed pixel buffer".to_string())
    }

    pub(super) fn encode(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, String> {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();

        let mut heif_image = Image::new(width, height, ColorSpace::Rgb(RgbChroma::Rgba))
            .map_err(|e| format!("unable to allocate HEIF image: {e}"))?;
        heif_image
            .create_plane(Channel::Interleaved, width, height, 32)
            .map_err(|e| format!("unable to allocate HEIF plane: {e}"))?;

        {
            let mut planes = heif_image.planes_mut();
            let plane = planes
                .interleaved
                .as_mut()
                .ok_or_else(|| "HEIF image has no interleaved plane".to_string())?;
            let stride = plane.stride;
            let row_len = width as usize * 4;
            for (row, chunk) in rgba.as_raw().chunks_exact(row_len).enumerate() {
                let start = row * stride;
                plane.data[start..start + row_len].copy_from_slice(chunk);
            }
        }

        let lib_heif = LibHeif::new();
        let mut context =
            HeifContext::new().map_err(|e| format!("unable to create HEIF context: {e}"))?;
        let mut encoder = lib_heif
            .encoder_for_format(CompressionFormat::Hevc)
            .map_err(|e| format!("no HEVC encoder available: {e}"))?;
        encoder
            .set_quality(EncoderQuality::Lossy(quality))
            .map_err(|e| format!("unable to set HEIF quality: {e}"))?;
        context
            .encode_image(&heif_image, &mut encoder, None)
            .map_err(|e| format!("unable to encode HEIF image: {e}"))?;
        context
            .write_to_bytes()
            .map_err(|e| format!("unable to serialize HEIF container: {e}"))
    }
}
