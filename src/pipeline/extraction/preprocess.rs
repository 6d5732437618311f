//! Image preprocessing: decode, orientation, quality, and OCR variants.
//!
//! `PreprocessingPipeline` turns request bytes into a `RawImage` once, then
//! derives any number of recognizer-ready variants from it. Every variant is
//! a pure function of the decoded image; nothing is cached across requests.
//!
//! Variant chains:
//! - `standard`: resize → gray → NLM denoise → CLAHE 2.0/8x8 → adaptive
//!   Gaussian 11/2 → close/open 1x1
//! - `shiny`: resize → glare suppression (CLAHE 3.0 on luma) → gray →
//!   bilateral → unsharp 1.5/-0.5 → adaptive Gaussian 15/2 → deskew →
//!   close/open 2x2
//! - `inverted`: polarity flip of `standard`
//! - `high_contrast`: resize → gray → CLAHE 4.0/4x4 → unsharp 2.0/-1.0 → Otsu
//! - `otsu`: resize → gray → Otsu
//! - `adaptive_mean`: resize → gray → adaptive mean 11/2

use std::borrow::Cow;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageOutputFormat, RgbImage};
use serde::Serialize;
use tracing::debug;

use super::filters;
use super::types::{PreprocessedImage, RawImage, Variant};
use super::ExtractionError;

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Maximum input image size (in bytes) before rejecting.
/// Prevents OOM on corrupt/adversarial files.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Minimum valid image size in bytes (smallest valid PNG is ~67 bytes).
const MIN_IMAGE_BYTES: usize = 67;

/// Widths outside `[MIN_OCR_WIDTH, MAX_OCR_WIDTH]` are rescaled to `TARGET_OCR_WIDTH`.
pub const MIN_OCR_WIDTH: u32 = 750;
pub const MAX_OCR_WIDTH: u32 = 3000;
pub const TARGET_OCR_WIDTH: u32 = 1500;

const NLM_STRENGTH: f32 = 10.0;
const NLM_PATCH_RADIUS: u32 = 3;
const NLM_SEARCH_RADIUS: u32 = 5;

const BILATERAL_RADIUS: u32 = 4;
const BILATERAL_SIGMA_COLOR: f32 = 75.0;
const BILATERAL_SIGMA_SPACE: f32 = 75.0;

const THRESHOLD_C: f32 = 2.0;

// Quality thresholds, tuned for handheld phone shots of packaging.
const DARK_BRIGHTNESS: f32 = 40.0;
const BRIGHT_BRIGHTNESS: f32 = 215.0;
const BLUR_THRESHOLD: f32 = 100.0;
const CONTRAST_THRESHOLD: f32 = 30.0;
const MIN_QUALITY_WIDTH: u32 = 800;
const MIN_QUALITY_HEIGHT: u32 = 600;

// ═══════════════════════════════════════════════════════════
// Service traits
// ═══════════════════════════════════════════════════════════

/// Corrects image orientation from capture metadata.
pub trait OrientationCorrector: Send + Sync {
    fn correct(&self, raw_bytes: &[u8], image: DynamicImage) -> DynamicImage;
}

// ═══════════════════════════════════════════════════════════
// Result types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub brightness: f32,
    pub blur_score: f32,
    pub contrast: f32,
    pub width: u32,
    pub height: u32,
}

/// Photo suitability report. Advisory only: OCR runs regardless.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub suitable: bool,
    /// 0-100, higher is better.
    pub quality_score: u8,
    pub issues: Vec<String>,
    pub metrics: QualityMetrics,
}

// ═══════════════════════════════════════════════════════════
// PreprocessingPipeline
// ═══════════════════════════════════════════════════════════

/// Pipeline flow:
/// 1. Validate bytes (size bounds)
/// 2. Decode image
/// 3. `orientation.correct()`: fix EXIF rotation
/// 4. Convert to RGB (`RawImage`)
/// 5. `variant()` per requested variant: resize plus variant chain
pub struct PreprocessingPipeline {
    orientation: Box<dyn OrientationCorrector>,
}

impl Default for PreprocessingPipeline {
    fn default() -> Self {
        Self::new(Box::new(ExifOrientationCorrector))
    }
}

impl PreprocessingPipeline {
    pub fn new(orientation: Box<dyn OrientationCorrector>) -> Self {
        Self { orientation }
    }

    /// Validate, decode, and orient request bytes.
    pub fn decode(&self, image_bytes: &[u8]) -> Result<RawImage, ExtractionError> {
        validate_image_bytes(image_bytes)?;

        let img = image::load_from_memory(image_bytes)
            .map_err(|e| ExtractionError::ImageDecode(format!("Failed to decode image: {e}")))?;
        let channels = img.color().channel_count();
        let img = self.orientation.correct(image_bytes, img);
        let image = img.to_rgb8();

        if image.width() == 0 || image.height() == 0 {
            return Err(ExtractionError::InvalidImage("Image has no pixels".into()));
        }

        let raw = RawImage { image, channels };
        debug!(
            width = raw.width(),
            height = raw.height(),
            channels,
            "Image decoded"
        );

        Ok(raw)
    }

    /// Produce one recognizer-ready image for `variant`.
    pub fn variant(&self, raw: &RawImage, variant: Variant) -> PreprocessedImage {
        let resized = resize_for_ocr(&raw.image);
        let (image, deskew_degrees) = match variant {
            Variant::Standard => (standard_chain(&resized), 0.0),
            Variant::Inverted => (filters::invert(&standard_chain(&resized)), 0.0),
            Variant::Shiny => shiny_chain(&resized, raw.channels >= 3),
            Variant::HighContrast => (high_contrast_chain(&resized), 0.0),
            Variant::Otsu => (filters::otsu_threshold(&filters::rgb_to_gray(&resized)), 0.0),
            Variant::AdaptiveMean => (
                filters::adaptive_threshold_mean(&filters::rgb_to_gray(&resized), 11, THRESHOLD_C),
                0.0,
            ),
        };

        debug!(
            variant = variant.as_str(),
            width = image.width(),
            height = image.height(),
            deskew_degrees,
            "Variant prepared"
        );

        PreprocessedImage {
            variant,
            image,
            deskew_degrees,
        }
    }

    /// Produce every requested variant, in order. `inverted` reuses the
    /// `standard` result when both are requested.
    pub fn variants(&self, raw: &RawImage, wanted: &[Variant]) -> Vec<PreprocessedImage> {
        let mut out: Vec<PreprocessedImage> = Vec::with_capacity(wanted.len());
        for &variant in wanted {
            if out.iter().any(|p| p.variant == variant) {
                continue;
            }
            let reuse = match variant {
                Variant::Inverted => out.iter().find(|p| p.variant == Variant::Standard),
                _ => None,
            };
            let prepared = match reuse {
                Some(standard) => PreprocessedImage {
                    variant,
                    image: filters::invert(&standard.image),
                    deskew_degrees: 0.0,
                },
                None => self.variant(raw, variant),
            };
            out.push(prepared);
        }
        out
    }
}

fn standard_chain(rgb: &RgbImage) -> GrayImage {
    let gray = filters::rgb_to_gray(rgb);
    let denoised = filters::non_local_means(&gray, NLM_STRENGTH, NLM_PATCH_RADIUS, NLM_SEARCH_RADIUS);
    let enhanced = filters::clahe(&denoised, 2.0, (8, 8));
    let binary = filters::adaptive_threshold_gaussian(&enhanced, 11, THRESHOLD_C);
    let closed = filters::morph_close(&binary, 1, 1);
    filters::morph_open(&closed, 1, 1)
}

fn shiny_chain(rgb: &RgbImage, is_color: bool) -> (GrayImage, f32) {
    let deglared: Cow<'_, RgbImage> = if is_color {
        Cow::Owned(filters::suppress_glare(rgb, 3.0))
    } else {
        Cow::Borrowed(rgb)
    };
    let gray = filters::rgb_to_gray(&deglared);
    let smoothed = filters::bilateral_filter(
        &gray,
        BILATERAL_RADIUS,
        BILATERAL_SIGMA_COLOR,
        BILATERAL_SIGMA_SPACE,
    );
    let sharpened = filters::unsharp_mask(&smoothed, 2.0, 1.5);
    let binary = filters::adaptive_threshold_gaussian(&sharpened, 15, THRESHOLD_C);
    let (straight, angle) = filters::deskew(&binary);
    let closed = filters::morph_close(&straight, 2, 2);
    (filters::morph_open(&closed, 2, 2), angle)
}

fn high_contrast_chain(rgb: &RgbImage) -> GrayImage {
    let gray = filters::rgb_to_gray(rgb);
    let enhanced = filters::clahe(&gray, 4.0, (4, 4));
    let sharpened = filters::unsharp_mask(&enhanced, 1.5, 2.0);
    filters::otsu_threshold(&sharpened)
}

/// Rescale to `TARGET_OCR_WIDTH` (aspect preserved, cubic) when the width is
/// outside `[MIN_OCR_WIDTH, MAX_OCR_WIDTH]`; borrow unchanged otherwise.
pub fn resize_for_ocr(img: &RgbImage) -> Cow<'_, RgbImage> {
    let (w, h) = img.dimensions();
    if (MIN_OCR_WIDTH..=MAX_OCR_WIDTH).contains(&w) {
        return Cow::Borrowed(img);
    }
    let new_h = ((TARGET_OCR_WIDTH as u64 * h as u64) / w as u64).max(1) as u32;
    debug!(
        width = w,
        height = h,
        target_width = TARGET_OCR_WIDTH,
        target_height = new_h,
        "Resizing for OCR"
    );
    Cow::Owned(image::imageops::resize(
        img,
        TARGET_OCR_WIDTH,
        new_h,
        FilterType::CatmullRom,
    ))
}

// ═══════════════════════════════════════════════════════════
// Production implementations
// ═══════════════════════════════════════════════════════════

// ── ExifOrientationCorrector ──────────────────────────────

/// EXIF-based orientation correction for phone photos.
///
/// Reads EXIF tag 0x0112 (Orientation) from raw bytes via `kamadak-exif`.
///
/// EXIF orientation values:
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
pub struct ExifOrientationCorrector;

impl OrientationCorrector for ExifOrientationCorrector {
    fn correct(&self, raw_bytes: &[u8], image: DynamicImage) -> DynamicImage {
        let orientation = read_exif_orientation(raw_bytes);
        if orientation != 1 {
            debug!(orientation, "Applying EXIF orientation");
        }
        apply_orientation(image, orientation)
    }
}

/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let Ok(reader) = exif::Reader::new().read_from_container(&mut cursor) else {
        return 1;
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Leaves the image as decoded.
pub struct NoOpOrientationCorrector;

impl OrientationCorrector for NoOpOrientationCorrector {
    fn correct(&self, _raw_bytes: &[u8], image: DynamicImage) -> DynamicImage {
        image
    }
}

// ── Quality assessment ────────────────────────────────────

/// Brightness, blur, contrast, and resolution checks on the decoded photo.
///
/// Score starts at 100: -30 for bad exposure, -40 for blur, -20 for low
/// contrast, -10 for a narrow image.
pub fn assess_quality(image: &RgbImage) -> QualityReport {
    let gray = filters::rgb_to_gray(image);
    let (width, height) = gray.dimensions();
    let brightness = mean_brightness(&gray);
    let blur_score = compute_laplacian_variance(&gray);
    let contrast = compute_contrast_score(&gray);

    let mut issues = Vec::new();
    let mut score: i32 = 100;

    if brightness < DARK_BRIGHTNESS {
        issues.push("Image too dark - use better lighting".to_string());
    } else if brightness > BRIGHT_BRIGHTNESS {
        issues.push("Image too bright/overexposed - reduce lighting".to_string());
    }
    if !(DARK_BRIGHTNESS..=BRIGHT_BRIGHTNESS).contains(&brightness) {
        score -= 30;
    }

    if blur_score < BLUR_THRESHOLD {
        issues.push("Image too blurry - hold camera steady and focus on text".to_string());
        score -= 40;
    }

    if contrast < CONTRAST_THRESHOLD {
        issues.push("Low contrast - improve lighting or try different angle".to_string());
        score -= 20;
    }

    if width < MIN_QUALITY_WIDTH || height < MIN_QUALITY_HEIGHT {
        issues.push("Image resolution too low - get closer to the text".to_string());
    }
    if width < MIN_QUALITY_WIDTH {
        score -= 10;
    }

    QualityReport {
        suitable: issues.is_empty(),
        quality_score: score.clamp(0, 100) as u8,
        issues,
        metrics: QualityMetrics {
            brightness: round2(brightness),
            blur_score: round2(blur_score),
            contrast: round2(contrast),
            width,
            height,
        },
    }
}

fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

fn mean_brightness(img: &GrayImage) -> f32 {
    let count = img.as_raw().len();
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = img.as_raw().iter().map(|v| *v as u64).sum();
    (sum as f64 / count as f64) as f32
}

/// Compute Laplacian variance, a measure of image sharpness.
///
/// Uses a 3x3 Laplacian kernel: `[0,1,0; 1,-4,1; 0,1,0]`.
/// Higher variance = sharper image.
pub fn compute_laplacian_variance(img: &GrayImage) -> f32 {
    let (w, h) = (img.width() as i32, img.height() as i32);
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let px = |dx: i32, dy: i32| img.get_pixel((x + dx) as u32, (y + dy) as u32).0[0] as f64;
            let laplacian = px(0, -1) + px(0, 1) + px(-1, 0) + px(1, 0) - 4.0 * px(0, 0);
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64) - (mean * mean);
    variance.max(0.0) as f32
}

/// RMS contrast: standard deviation of grayscale intensities.
pub fn compute_contrast_score(img: &GrayImage) -> f32 {
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for pixel in img.pixels() {
        let val = pixel.0[0] as f64;
        sum += val;
        sum_sq += val * val;
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }

    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64) - (mean * mean);
    variance.max(0.0).sqrt() as f32
}

// ═══════════════════════════════════════════════════════════
// Pure helper functions (reusable)
// ═══════════════════════════════════════════════════════════

/// Validate image bytes before decoding.
pub fn validate_image_bytes(bytes: &[u8]) -> Result<(), ExtractionError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(ExtractionError::InvalidImage(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ExtractionError::InvalidImage(format!(
            "Image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Encode a grayscale image as PNG bytes for the OCR engine.
pub fn encode_png(img: &GrayImage) -> Result<Vec<u8>, ExtractionError> {
    let dynamic = DynamicImage::ImageLuma8(img.clone());
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
