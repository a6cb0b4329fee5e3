//! Image preparation and the preprocessing strategies fed to recognition.
//!
//! Two stages:
//! 1. `prepare_image`: validate, decode, EXIF-orient, grayscale, upscale to the
//!    resolution floor. Runs once per image.
//! 2. `ImagePreprocessor::apply`: one of the six strategies (or one of the four
//!    emergency transforms) over the prepared grayscale image. Pure
//!    image-to-image, no I/O.

use std::io::Cursor;

use image::{DynamicImage, GenericImageView, GrayImage};
use tracing::debug;

use super::imaging::{self, AdaptiveMethod};
use super::ExtractionError;
use crate::config::ExtractionConfig;
use crate::models::enums::str_enum;

/// Smallest byte count that can hold a valid PNG.
const MIN_IMAGE_BYTES: usize = 67;

str_enum!(
    /// Named image transformation applied before recognition.
    PreprocessingStrategy {
        Standard => "standard",
        HighContrast => "high_contrast",
        Denoised => "denoised",
        Sharpened => "sharpened",
        Morphological => "morphological",
        AdaptiveBilateral => "adaptive_bilateral",
    }
);

str_enum!(
    /// Last-chance transforms tried in order when every regular attempt fails.
    EmergencyTransform {
        ExtremeContrast => "extreme_contrast",
        EdgeEnhancement => "edge_enhancement",
        DilationErosion => "dilation_erosion",
        GaussianBlurSharpen => "gaussian_blur_sharpen",
    }
);

// ═══════════════════════════════════════════════════════════
// Service traits
// ═══════════════════════════════════════════════════════════

/// Fixes image orientation from EXIF metadata.
///
/// Phone photos embed rotation in EXIF tag 0x0112; without correction a
/// portrait photo of a report reaches recognition sideways.
pub trait OrientationCorrector: Send + Sync {
    /// No-op if no EXIF or orientation=1.
    fn correct(&self, raw_bytes: &[u8], image: DynamicImage) -> DynamicImage;
}

/// Applies preprocessing strategies to a prepared grayscale image.
pub trait ImagePreprocessor: Send + Sync {
    fn apply(&self, image: &GrayImage, strategy: PreprocessingStrategy) -> GrayImage;

    fn apply_emergency(&self, image: &GrayImage, transform: EmergencyTransform) -> GrayImage;
}

// ═══════════════════════════════════════════════════════════
// Prepared image
// ═══════════════════════════════════════════════════════════

/// Decoded, oriented, grayscale image at or above the resolution floor.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub image: GrayImage,
    /// Dimensions after orientation, before upscaling.
    pub original_width: u32,
    pub original_height: u32,
}

impl PreparedImage {
    pub fn from_gray(image: GrayImage) -> Self {
        let (w, h) = image.dimensions();
        Self {
            image,
            original_width: w,
            original_height: h,
        }
    }

    pub fn original_size_label(&self) -> String {
        format!("{}x{}", self.original_width, self.original_height)
    }

    /// "unchanged" when no upscale happened.
    pub fn processed_size_label(&self) -> String {
        let (w, h) = self.image.dimensions();
        if (w, h) == (self.original_width, self.original_height) {
            "unchanged".to_string()
        } else {
            format!("{w}x{h}")
        }
    }
}

/// Validate, decode, orient, grayscale and upscale an encoded image.
pub fn prepare_image(
    bytes: &[u8],
    orientation: &dyn OrientationCorrector,
    config: &ExtractionConfig,
) -> Result<PreparedImage, ExtractionError> {
    validate_image_bytes(bytes, config.max_input_bytes)?;

    let img = image::load_from_memory(bytes)
        .map_err(|e| ExtractionError::ImageProcessing(format!("Failed to decode image: {e}")))?;
    prepare_decoded(orientation.correct(bytes, img), config)
}

/// Grayscale and upscale an already decoded, upright image.
pub fn prepare_decoded(img: DynamicImage, config: &ExtractionConfig) -> Result<PreparedImage, ExtractionError> {
    let (orig_w, orig_h) = img.dimensions();
    if orig_w == 0 || orig_h == 0 {
        return Err(ExtractionError::ImageProcessing("Image has zero size".into()));
    }

    let gray = imaging::rgb_to_gray(&img.to_rgb8());

    let image = match compute_upscale_dimensions(orig_w, orig_h, config.floor_width, config.floor_height) {
        Some((new_w, new_h)) => {
            debug!(
                from = format!("{orig_w}x{orig_h}"),
                to = format!("{new_w}x{new_h}"),
                "Upscaling image below resolution floor"
            );
            imaging::resize_lanczos(&gray, new_w, new_h)
        }
        None => gray,
    };

    Ok(PreparedImage {
        image,
        original_width: orig_w,
        original_height: orig_h,
    })
}

/// Target dimensions when the image is below the floor in either direction.
///
/// Scales uniformly by `max(floor_w / w, floor_h / h)` so both floors are met.
pub fn compute_upscale_dimensions(
    width: u32,
    height: u32,
    floor_width: u32,
    floor_height: u32,
) -> Option<(u32, u32)> {
    if width == 0 || height == 0 || (width >= floor_width && height >= floor_height) {
        return None;
    }
    let scale = (floor_width as f64 / width as f64).max(floor_height as f64 / height as f64);
    let new_w = ((width as f64 * scale).round() as u32).max(1);
    let new_h = ((height as f64 * scale).round() as u32).max(1);
    Some((new_w, new_h))
}

/// Returns early error for clearly invalid input, before decoding.
pub fn validate_image_bytes(bytes: &[u8], max_bytes: usize) -> Result<(), ExtractionError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(ExtractionError::ImageProcessing(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > max_bytes {
        return Err(ExtractionError::InputTooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Production implementations
// ═══════════════════════════════════════════════════════════

// ── ExifOrientationCorrector ──────────────────────────────

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

/// Rendered PDF pages carry no EXIF.
pub struct NoOpOrientationCorrector;

impl OrientationCorrector for NoOpOrientationCorrector {
    fn correct(&self, _raw_bytes: &[u8], image: DynamicImage) -> DynamicImage {
        image
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

// ── PixelPreprocessor ─────────────────────────────────────

/// The production strategy set, built on the `imaging` primitives.
pub struct PixelPreprocessor;

impl ImagePreprocessor for PixelPreprocessor {
    fn apply(&self, image: &GrayImage, strategy: PreprocessingStrategy) -> GrayImage {
        match strategy {
            PreprocessingStrategy::Standard => {
                let smoothed = imaging::bilateral_filter(image, 9, 75.0, 75.0);
                imaging::adaptive_threshold(&smoothed, 11, 2.0, AdaptiveMethod::Gaussian)
            }
            PreprocessingStrategy::HighContrast => {
                let equalized = imaging::equalize_histogram(image);
                let local = imaging::clahe(&equalized, 3.0, 8);
                imaging::otsu_threshold(&local)
            }
            PreprocessingStrategy::Denoised => {
                let denoised = imaging::non_local_means(image, 10.0, 1, 3);
                let smoothed = imaging::bilateral_filter(&denoised, 15, 80.0, 80.0);
                imaging::adaptive_threshold(&smoothed, 15, 8.0, AdaptiveMethod::Mean)
            }
            PreprocessingStrategy::Sharpened => {
                let sharpened = unsharp(image, 0, 2.0);
                imaging::adaptive_threshold(&sharpened, 11, 2.0, AdaptiveMethod::Gaussian)
            }
            PreprocessingStrategy::Morphological => {
                let binary = imaging::otsu_threshold(image);
                imaging::morph_close(&imaging::morph_open(&binary, 2), 2)
            }
            PreprocessingStrategy::AdaptiveBilateral => {
                let pass1 = imaging::bilateral_filter(image, 5, 50.0, 50.0);
                let pass2 = imaging::bilateral_filter(&pass1, 9, 75.0, 75.0);
                let pass3 = imaging::bilateral_filter(&pass2, 13, 100.0, 100.0);
                imaging::adaptive_threshold(&pass3, 21, 10.0, AdaptiveMethod::Gaussian)
            }
        }
    }

    fn apply_emergency(&self, image: &GrayImage, transform: EmergencyTransform) -> GrayImage {
        match transform {
            EmergencyTransform::ExtremeContrast => {
                let stretched = imaging::percentile_stretch(image, 1.0, 99.0);
                imaging::threshold(&stretched, 127)
            }
            EmergencyTransform::EdgeEnhancement => {
                imaging::threshold(&imaging::sobel_magnitude(image), 50)
            }
            EmergencyTransform::DilationErosion => {
                let binary = imaging::otsu_threshold(image);
                imaging::erode(&imaging::dilate(&binary, 2, 1), 2, 1)
            }
            EmergencyTransform::GaussianBlurSharpen => {
                imaging::otsu_threshold(&unsharp(image, 3, 0.0))
            }
        }
    }
}

/// `1.5 * img - 0.5 * blur(img)`.
fn unsharp(image: &GrayImage, kernel_size: usize, sigma: f32) -> GrayImage {
    let blurred = imaging::gaussian_blur(image, kernel_size, sigma);
    imaging::weighted_sum(image, 1.5, &blurred, -0.5)
}

// ═══════════════════════════════════════════════════════════
// Mock implementations (testing)
// ═══════════════════════════════════════════════════════════

/// Returns the input unchanged for every strategy.
pub struct MockImagePreprocessor;

impl ImagePreprocessor for MockImagePreprocessor {
    fn apply(&self, image: &GrayImage, _strategy: PreprocessingStrategy) -> GrayImage {
        image.clone()
    }

    fn apply_emergency(&self, image: &GrayImage, _transform: EmergencyTransform) -> GrayImage {
        image.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Luma, Rgb, RgbImage};

    fn make_test_image(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    /// Small light page with two dark "text" bars.
    fn text_like(w: u32, h: u32) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([230]));
        for y in (h / 4)..(h / 4 + 3) {
            for x in 4..w - 4 {
                img.put_pixel(x, y, Luma([25]));
            }
        }
        for y in (h / 2)..(h / 2 + 3) {
            for x in 4..w / 2 {
                img.put_pixel(x, y, Luma([25]));
            }
        }
        img
    }

    // ── upscale floor ──

    #[test]
    fn small_image_is_upscaled_to_both_floors() {
        assert_eq!(compute_upscale_dimensions(400, 400, 800, 600), Some((800, 800)));
        assert_eq!(compute_upscale_dimensions(1000, 300, 800, 600), Some((2000, 600)));
    }

    #[test]
    fn large_image_is_left_alone() {
        assert!(compute_upscale_dimensions(800, 600, 800, 600).is_none());
        assert!(compute_upscale_dimensions(2480, 3508, 800, 600).is_none());
    }

    #[test]
    fn prepare_image_reports_sizes() {
        let config = ExtractionConfig::default();
        let png = make_test_image(200, 150, [240, 240, 240]);
        let prepared = prepare_image(&png, &ExifOrientationCorrector, &config).unwrap();
        assert_eq!(prepared.image.dimensions(), (800, 600));
        assert_eq!(prepared.original_size_label(), "200x150");
        assert_eq!(prepared.processed_size_label(), "800x600");
    }

    #[test]
    fn prepare_image_unchanged_label_at_floor() {
        let config = ExtractionConfig::default();
        let png = make_test_image(800, 600, [240, 240, 240]);
        let prepared = prepare_image(&png, &NoOpOrientationCorrector, &config).unwrap();
        assert_eq!(prepared.processed_size_label(), "unchanged");
    }

    #[test]
    fn prepare_rejects_tiny_and_garbage_input() {
        let config = ExtractionConfig::default();
        let err = prepare_image(&[0x89, 0x50], &ExifOrientationCorrector, &config).unwrap_err();
        assert!(err.to_string().contains("too small"));

        let garbage = [0xDE, 0xAD, 0xBE, 0xEF].repeat(25);
        let err = prepare_image(&garbage, &ExifOrientationCorrector, &config).unwrap_err();
        assert!(matches!(err, ExtractionError::ImageProcessing(_)));
    }

    #[test]
    fn oversized_input_is_rejected_before_decoding() {
        let err = validate_image_bytes(&vec![0u8; 101], 100).unwrap_err();
        assert!(matches!(err, ExtractionError::InputTooLarge { size: 101, limit: 100 }));
    }

    // ── EXIF orientation ──

    #[test]
    fn exif_no_data_returns_identity() {
        let png = make_test_image(10, 10, [128, 128, 128]);
        assert_eq!(read_exif_orientation(&png), 1);
    }

    #[test]
    fn apply_orientation_rotations_swap_dimensions() {
        let base = || DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 20, Rgb([100, 100, 100])));
        assert_eq!(apply_orientation(base(), 1).dimensions(), (10, 20));
        assert_eq!(apply_orientation(base(), 3).dimensions(), (10, 20));
        assert_eq!(apply_orientation(base(), 6).dimensions(), (20, 10));
        assert_eq!(apply_orientation(base(), 8).dimensions(), (20, 10));
        assert_eq!(apply_orientation(base(), 99).dimensions(), (10, 20));
    }

    // ── strategies ──

    #[test]
    fn every_strategy_produces_binary_image_of_same_size() {
        let img = text_like(48, 32);
        let pre = PixelPreprocessor;
        for &strategy in PreprocessingStrategy::ALL {
            let out = pre.apply(&img, strategy);
            assert_eq!(out.dimensions(), img.dimensions(), "{strategy}");
            assert!(
                out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255),
                "{strategy} output is not binary"
            );
        }
    }

    #[test]
    fn strategies_keep_text_dark_and_background_light() {
        let img = text_like(48, 32);
        let pre = PixelPreprocessor;
        for strategy in [
            PreprocessingStrategy::Standard,
            PreprocessingStrategy::HighContrast,
            PreprocessingStrategy::Morphological,
        ] {
            let out = pre.apply(&img, strategy);
            assert_eq!(out.get_pixel(20, 9).0[0], 0, "{strategy}");
            assert_eq!(out.get_pixel(20, 2).0[0], 255, "{strategy}");
        }
    }

    #[test]
    fn emergency_transforms_preserve_dimensions() {
        let img = text_like(40, 24);
        let pre = PixelPreprocessor;
        for &transform in EmergencyTransform::ALL {
            assert_eq!(pre.apply_emergency(&img, transform).dimensions(), (40, 24));
        }
    }

    #[test]
    fn strategy_names_round_trip() {
        assert_eq!(PreprocessingStrategy::ALL.len(), 6);
        assert_eq!(
            "adaptive_bilateral".parse::<PreprocessingStrategy>().unwrap(),
            PreprocessingStrategy::AdaptiveBilateral
        );
        assert_eq!(EmergencyTransform::ALL[0].as_str(), "extreme_contrast");
        assert!("unknown".parse::<EmergencyTransform>().is_err());
    }

    #[test]
    fn mock_preprocessor_is_identity() {
        let img = text_like(16, 16);
        assert_eq!(MockImagePreprocessor.apply(&img, PreprocessingStrategy::Denoised), img);
    }
}
