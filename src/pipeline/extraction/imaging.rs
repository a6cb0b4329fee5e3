//! Pure-Rust grayscale pixel primitives used by the preprocessing strategies.
//!
//! No `imageproc` dependency: every filter works directly on `GrayImage`
//! buffers with replicated borders.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma, RgbImage};

use super::ExtractionError;

// ═══════════════════════════════════════════════════════════
// Conversion & encoding
// ═══════════════════════════════════════════════════════════

/// Convert RGB image to grayscale using ITU-R BT.601 luminance.
pub fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    let (w, h) = (rgb.width(), rgb.height());
    let mut gray = GrayImage::new(w, h);
    for (x, y, p) in rgb.enumerate_pixels() {
        let luma = (0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32)
            .round()
            .clamp(0.0, 255.0) as u8;
        gray.put_pixel(x, y, Luma([luma]));
    }
    gray
}

/// Encode a grayscale image as PNG bytes.
pub fn encode_png(img: &GrayImage) -> Result<Vec<u8>, ExtractionError> {
    let dynamic = DynamicImage::ImageLuma8(img.clone());
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

pub fn resize_lanczos(img: &GrayImage, width: u32, height: u32) -> GrayImage {
    image::imageops::resize(img, width.max(1), height.max(1), FilterType::Lanczos3)
}

// ═══════════════════════════════════════════════════════════
// Internal float plane helpers
// ═══════════════════════════════════════════════════════════

fn to_plane(img: &GrayImage) -> Vec<f32> {
    img.as_raw().iter().map(|&v| v as f32).collect()
}

fn from_plane(plane: &[f32], w: u32, h: u32) -> GrayImage {
    let data = plane
        .iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();
    GrayImage::from_raw(w, h, data).unwrap_or_else(|| GrayImage::new(w, h))
}

#[inline]
fn clamp_index(v: i64, len: u32) -> usize {
    v.clamp(0, len as i64 - 1) as usize
}

/// Horizontal then vertical pass of a 1-D kernel, replicated borders.
fn separable_filter(plane: &[f32], w: u32, h: u32, kernel: &[f32]) -> Vec<f32> {
    let radius = (kernel.len() / 2) as i64;
    let (wu, hu) = (w as usize, h as usize);
    let mut tmp = vec![0.0f32; plane.len()];
    for y in 0..hu {
        for x in 0..wu {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = clamp_index(x as i64 + k as i64 - radius, w);
                acc += weight * plane[y * wu + sx];
            }
            tmp[y * wu + x] = acc;
        }
    }
    let mut out = vec![0.0f32; plane.len()];
    for y in 0..hu {
        for x in 0..wu {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = clamp_index(y as i64 + k as i64 - radius, h);
                acc += weight * tmp[sy * wu + x];
            }
            out[y * wu + x] = acc;
        }
    }
    out
}

/// Normalized 1-D Gaussian kernel. `sigma <= 0` derives sigma from the size.
fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let size = size.max(1) | 1;
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let radius = (size / 2) as f32;
    let mut kernel: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - radius;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

// ═══════════════════════════════════════════════════════════
// Smoothing
// ═══════════════════════════════════════════════════════════

/// Gaussian blur. `size == 0` derives the kernel size from sigma.
pub fn gaussian_blur(img: &GrayImage, size: usize, sigma: f32) -> GrayImage {
    let size = if size == 0 {
        ((sigma * 3.0).ceil() as usize) * 2 + 1
    } else {
        size
    };
    let kernel = gaussian_kernel(size, sigma);
    let out = separable_filter(&to_plane(img), img.width(), img.height(), &kernel);
    from_plane(&out, img.width(), img.height())
}

/// Edge-preserving bilateral filter over a circular window of `diameter` pixels.
pub fn bilateral_filter(img: &GrayImage, diameter: u32, sigma_color: f32, sigma_space: f32) -> GrayImage {
    let (w, h) = (img.width(), img.height());
    let radius = (diameter / 2).max(1) as i64;
    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let space_coeff = -0.5 / (sigma_space * sigma_space);

    let mut offsets = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f32;
            if r2.sqrt() <= radius as f32 {
                offsets.push((dx, dy, (r2 * space_coeff).exp()));
            }
        }
    }
    let color_lut: Vec<f32> = (0..256)
        .map(|d| ((d * d) as f32 * color_coeff).exp())
        .collect();

    let src = img.as_raw();
    let wu = w as usize;
    let mut out = GrayImage::new(w, h);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let center = src[y as usize * wu + x as usize] as i32;
            let mut sum = 0.0f32;
            let mut weight_sum = 0.0f32;
            for &(dx, dy, space_weight) in &offsets {
                let sx = clamp_index(x + dx, w);
                let sy = clamp_index(y + dy, h);
                let v = src[sy * wu + sx] as i32;
                let weight = space_weight * color_lut[(v - center).unsigned_abs() as usize];
                sum += weight * v as f32;
                weight_sum += weight;
            }
            let value = if weight_sum > 0.0 { sum / weight_sum } else { center as f32 };
            out.put_pixel(x as u32, y as u32, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Non-local means denoising with a small patch/search window.
///
/// `strength` plays the role of the filter parameter h.
pub fn non_local_means(img: &GrayImage, strength: f32, patch_radius: u32, search_radius: u32) -> GrayImage {
    let (w, h) = (img.width(), img.height());
    let src = img.as_raw();
    let wu = w as usize;
    let pr = patch_radius as i64;
    let sr = search_radius as i64;
    let patch_area = ((2 * pr + 1) * (2 * pr + 1)) as f32;
    let h2 = (strength * strength).max(f32::EPSILON);

    let at = |x: i64, y: i64| src[clamp_index(y, h) * wu + clamp_index(x, w)] as f32;

    let mut out = GrayImage::new(w, h);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut sum = 0.0f32;
            let mut weight_sum = 0.0f32;
            for sy in -sr..=sr {
                for sx in -sr..=sr {
                    let mut dist = 0.0f32;
                    for py in -pr..=pr {
                        for px in -pr..=pr {
                            let d = at(x + px, y + py) - at(x + sx + px, y + sy + py);
                            dist += d * d;
                        }
                    }
                    let weight = (-(dist / patch_area) / h2).exp();
                    sum += weight * at(x + sx, y + sy);
                    weight_sum += weight;
                }
            }
            let value = if weight_sum > 0.0 { sum / weight_sum } else { at(x, y) };
            out.put_pixel(x as u32, y as u32, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Thresholding
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveMethod {
    Mean,
    Gaussian,
}

/// Local threshold: a pixel becomes white when it exceeds its neighborhood
/// average minus `offset`, black otherwise.
pub fn adaptive_threshold(img: &GrayImage, block_size: u32, offset: f32, method: AdaptiveMethod) -> GrayImage {
    let block = (block_size.max(3) | 1) as usize;
    let (w, h) = (img.width(), img.height());
    let plane = to_plane(img);
    let kernel = match method {
        AdaptiveMethod::Mean => vec![1.0 / block as f32; block],
        AdaptiveMethod::Gaussian => gaussian_kernel(block, 0.0),
    };
    let local = separable_filter(&plane, w, h, &kernel);
    let data = plane
        .iter()
        .zip(local.iter())
        .map(|(&v, &m)| if v > m - offset { 255 } else { 0 })
        .collect();
    GrayImage::from_raw(w, h, data).unwrap_or_else(|| GrayImage::new(w, h))
}

pub fn histogram(img: &GrayImage) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for &v in img.as_raw() {
        hist[v as usize] += 1;
    }
    hist
}

/// Otsu's global threshold level.
pub fn otsu_level(img: &GrayImage) -> u8 {
    let hist = histogram(img);
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 127;
    }
    let sum_all: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut weight_bg = 0u64;
    let mut sum_bg = 0.0f64;
    let mut best_level = 0u8;
    let mut best_variance = -1.0f64;
    for (level, &count) in hist.iter().enumerate() {
        weight_bg += count;
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }
        sum_bg += level as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (sum_all - sum_bg) / weight_fg as f64;
        let between = weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg).powi(2);
        if between > best_variance {
            best_variance = between;
            best_level = level as u8;
        }
    }
    best_level
}

/// Binary threshold: above `level` becomes 255, the rest 0.
pub fn threshold(img: &GrayImage, level: u8) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > level { 255 } else { 0 };
    }
    out
}

pub fn otsu_threshold(img: &GrayImage) -> GrayImage {
    threshold(img, otsu_level(img))
}

// ═══════════════════════════════════════════════════════════
// Contrast
// ═══════════════════════════════════════════════════════════

/// Global histogram equalization.
pub fn equalize_histogram(img: &GrayImage) -> GrayImage {
    let hist = histogram(img);
    let total: u64 = hist.iter().sum();
    let cdf_min = hist.iter().copied().find(|&c| c > 0).unwrap_or(0);
    if total == 0 || total == cdf_min {
        return img.clone();
    }
    let mut lut = [0u8; 256];
    let mut cdf = 0u64;
    for (i, &count) in hist.iter().enumerate() {
        cdf += count;
        let scaled = (cdf.saturating_sub(cdf_min)) as f64 * 255.0 / (total - cdf_min) as f64;
        lut[i] = scaled.round().clamp(0.0, 255.0) as u8;
    }
    apply_lut(img, &lut)
}

/// Contrast-limited adaptive histogram equalization over a `grid` x `grid` tiling.
pub fn clahe(img: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = (img.width(), img.height());
    let grid = grid.max(1);
    if w == 0 || h == 0 {
        return img.clone();
    }
    let tile_w = (w + grid - 1) / grid;
    let tile_h = (h + grid - 1) / grid;

    let mut luts = vec![[0u8; 256]; (grid * grid) as usize];
    for ty in 0..grid {
        for tx in 0..grid {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            let mut hist = [0u32; 256];
            let mut area = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[img.get_pixel(x, y).0[0] as usize] += 1;
                    area += 1;
                }
            }
            luts[(ty * grid + tx) as usize] = clahe_tile_lut(&mut hist, area, clip_limit);
        }
    }

    let axis = |pos: u32, tile: u32| -> (usize, usize, f32) {
        let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
        let t0 = f.floor().clamp(0.0, (grid - 1) as f32) as usize;
        let t1 = (t0 + 1).min(grid as usize - 1);
        let a = (f - t0 as f32).clamp(0.0, 1.0);
        (t0, t1, a)
    };

    let g = grid as usize;
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let (ty0, ty1, ay) = axis(y, tile_h);
        for x in 0..w {
            let (tx0, tx1, ax) = axis(x, tile_w);
            let v = img.get_pixel(x, y).0[0] as usize;
            let top = luts[ty0 * g + tx0][v] as f32 * (1.0 - ax) + luts[ty0 * g + tx1][v] as f32 * ax;
            let bottom = luts[ty1 * g + tx0][v] as f32 * (1.0 - ax) + luts[ty1 * g + tx1][v] as f32 * ax;
            let value = top * (1.0 - ay) + bottom * ay;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

fn clahe_tile_lut(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        for (i, slot) in lut.iter_mut().enumerate() {
            *slot = i as u8;
        }
        return lut;
    }
    let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for count in hist.iter_mut() {
        if *count > clip {
            excess += *count - clip;
            *count = clip;
        }
    }
    let bonus = excess / 256;
    for count in hist.iter_mut() {
        *count += bonus;
    }
    // Leftover counts go to every `step`-th bin across the whole range.
    let remainder = (excess % 256) as usize;
    if remainder > 0 {
        let step = (256 / remainder).max(1);
        for i in (0..256).step_by(step).take(remainder) {
            hist[i] += 1;
        }
    }
    let scale = 255.0 / area as f32;
    let mut cdf = 0u32;
    for (i, &count) in hist.iter().enumerate() {
        cdf += count;
        lut[i] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Linear stretch mapping the `low_pct` / `high_pct` percentiles to 0 / 255.
pub fn percentile_stretch(img: &GrayImage, low_pct: f32, high_pct: f32) -> GrayImage {
    let hist = histogram(img);
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return img.clone();
    }
    let percentile = |pct: f32| -> u8 {
        let target = (pct / 100.0 * total as f32).ceil().max(1.0) as u64;
        let mut cumulative = 0u64;
        for (i, &count) in hist.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return i as u8;
            }
        }
        255
    };
    let low = percentile(low_pct) as f32;
    let high = percentile(high_pct) as f32;
    if high <= low {
        return img.clone();
    }
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = ((i as f32 - low) * 255.0 / (high - low)).round().clamp(0.0, 255.0) as u8;
    }
    apply_lut(img, &lut)
}

/// `a * wa + b * wb`, saturated to 0..255.
pub fn weighted_sum(a: &GrayImage, wa: f32, b: &GrayImage, wb: f32) -> GrayImage {
    let mut out = a.clone();
    for (p, q) in out.pixels_mut().zip(b.pixels()) {
        let v = p.0[0] as f32 * wa + q.0[0] as f32 * wb;
        p.0[0] = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

fn apply_lut(img: &GrayImage, lut: &[u8; 256]) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Morphology & edges
// ═══════════════════════════════════════════════════════════

/// Min or max over a `kernel_w` x `kernel_h` window. Dilation uses the
/// reflected window so that even-sized open/close leave content in place.
fn rank_filter(img: &GrayImage, kernel_w: u32, kernel_h: u32, take_max: bool) -> GrayImage {
    let (w, h) = (img.width(), img.height());
    let (kw, kh) = (kernel_w.max(1) as i64, kernel_h.max(1) as i64);
    let (ax, ay) = (kw / 2, kh / 2);
    let sign = if take_max { -1 } else { 1 };
    let mut out = GrayImage::new(w, h);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut acc = if take_max { 0u8 } else { 255u8 };
            for dy in 0..kh {
                for dx in 0..kw {
                    let sx = clamp_index(x + sign * (dx - ax), w) as u32;
                    let sy = clamp_index(y + sign * (dy - ay), h) as u32;
                    let v = img.get_pixel(sx, sy).0[0];
                    acc = if take_max { acc.max(v) } else { acc.min(v) };
                }
            }
            out.put_pixel(x as u32, y as u32, Luma([acc]));
        }
    }
    out
}

/// Grow white regions.
pub fn dilate(img: &GrayImage, kernel_w: u32, kernel_h: u32) -> GrayImage {
    rank_filter(img, kernel_w, kernel_h, true)
}

/// Shrink white regions.
pub fn erode(img: &GrayImage, kernel_w: u32, kernel_h: u32) -> GrayImage {
    rank_filter(img, kernel_w, kernel_h, false)
}

pub fn morph_open(img: &GrayImage, size: u32) -> GrayImage {
    dilate(&erode(img, size, size), size, size)
}

pub fn morph_close(img: &GrayImage, size: u32) -> GrayImage {
    erode(&dilate(img, size, size), size, size)
}

/// Sobel gradient magnitude, min-max normalized to 0..255.
pub fn sobel_magnitude(img: &GrayImage) -> GrayImage {
    let (w, h) = (img.width(), img.height());
    let src = img.as_raw();
    let wu = w as usize;
    let at = |x: i64, y: i64| src[clamp_index(y, h) * wu + clamp_index(x, w)] as f32;

    let mut magnitude = vec![0.0f32; src.len()];
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let gx = at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1)
                - at(x - 1, y - 1)
                - 2.0 * at(x - 1, y)
                - at(x - 1, y + 1);
            let gy = at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1)
                - at(x - 1, y - 1)
                - 2.0 * at(x, y - 1)
                - at(x + 1, y - 1);
            magnitude[y as usize * wu + x as usize] = (gx * gx + gy * gy).sqrt();
        }
    }

    let (min, max) = magnitude
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if magnitude.is_empty() || max <= min {
        return GrayImage::new(w, h);
    }
    let scaled: Vec<f32> = magnitude.iter().map(|v| (v - min) * 255.0 / (max - min)).collect();
    from_plane(&scaled, w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(w: u32, h: u32, v: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([v]))
    }

    /// Dark text-like bar on a light background.
    fn bar_image() -> GrayImage {
        let mut img = uniform(40, 20, 220);
        for y in 8..12 {
            for x in 5..35 {
                img.put_pixel(x, y, Luma([30]));
            }
        }
        img
    }

    fn is_binary(img: &GrayImage) -> bool {
        img.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255)
    }

    #[test]
    fn rgb_to_gray_white_stays_white() {
        let rgb = RgbImage::from_pixel(3, 3, image::Rgb([255, 255, 255]));
        assert!(rgb_to_gray(&rgb).pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn gaussian_kernel_is_normalized() {
        let k = gaussian_kernel(11, 0.0);
        assert_eq!(k.len(), 11);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(k[5] > k[0]);
    }

    #[test]
    fn blur_preserves_uniform_image() {
        let img = uniform(10, 10, 128);
        assert!(gaussian_blur(&img, 3, 0.0).pixels().all(|p| p.0[0] == 128));
        assert!(gaussian_blur(&img, 0, 2.0).pixels().all(|p| p.0[0] == 128));
    }

    #[test]
    fn bilateral_preserves_hard_edges() {
        let img = bar_image();
        let out = bilateral_filter(&img, 9, 75.0, 75.0);
        assert!(out.get_pixel(20, 10).0[0] < 60);
        assert!(out.get_pixel(20, 2).0[0] > 190);
    }

    #[test]
    fn non_local_means_keeps_uniform_image() {
        let img = uniform(8, 8, 90);
        assert!(non_local_means(&img, 10.0, 1, 2).pixels().all(|p| p.0[0] == 90));
    }

    #[test]
    fn adaptive_threshold_marks_text_black() {
        let img = bar_image();
        for method in [AdaptiveMethod::Mean, AdaptiveMethod::Gaussian] {
            let out = adaptive_threshold(&img, 11, 2.0, method);
            assert!(is_binary(&out));
            assert_eq!(out.get_pixel(20, 10).0[0], 0);
            assert_eq!(out.get_pixel(20, 1).0[0], 255);
        }
    }

    #[test]
    fn adaptive_threshold_of_blank_page_is_white() {
        let out = adaptive_threshold(&uniform(20, 20, 250), 11, 2.0, AdaptiveMethod::Gaussian);
        assert!(out.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn otsu_splits_bimodal_histogram() {
        let img = bar_image();
        let level = otsu_level(&img);
        assert!((30..220).contains(&level));
        let out = otsu_threshold(&img);
        assert_eq!(out.get_pixel(20, 10).0[0], 0);
        assert_eq!(out.get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn equalization_spreads_two_levels() {
        let img = bar_image();
        let out = equalize_histogram(&img);
        assert_eq!(out.get_pixel(20, 10).0[0], 0);
        assert_eq!(out.get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn clahe_keeps_dimensions_and_order() {
        let img = bar_image();
        let out = clahe(&img, 3.0, 8);
        assert_eq!(out.dimensions(), img.dimensions());
        assert!(out.get_pixel(20, 10).0[0] < out.get_pixel(20, 1).0[0]);
    }

    #[test]
    fn clahe_residual_is_spread_over_the_range() {
        let mut dark = [0u32; 256];
        dark[30] = 15;
        let mut light = [0u32; 256];
        light[220] = 15;
        let dark_lut = clahe_tile_lut(&mut dark, 15, 3.0);
        let light_lut = clahe_tile_lut(&mut light, 15, 3.0);
        assert!(dark_lut[30] < 128, "dark tile maps to {}", dark_lut[30]);
        assert!(light_lut[220] > 128, "light tile maps to {}", light_lut[220]);
        assert_eq!(dark.iter().sum::<u32>(), 15);
    }

    #[test]
    fn percentile_stretch_expands_range() {
        let mut img = uniform(10, 10, 100);
        for x in 0..10 {
            img.put_pixel(x, 0, Luma([150]));
        }
        let out = percentile_stretch(&img, 1.0, 99.0);
        assert_eq!(out.get_pixel(5, 5).0[0], 0);
        assert_eq!(out.get_pixel(5, 0).0[0], 255);
    }

    #[test]
    fn dilate_and_erode_are_duals_on_a_dot() {
        let mut img = uniform(9, 9, 0);
        img.put_pixel(4, 4, Luma([255]));
        let grown = dilate(&img, 3, 3);
        assert_eq!(grown.pixels().filter(|p| p.0[0] == 255).count(), 9);
        let shrunk = erode(&grown, 3, 3);
        assert_eq!(shrunk.pixels().filter(|p| p.0[0] == 255).count(), 1);
    }

    #[test]
    fn even_open_and_close_keep_strokes_in_place() {
        let mut img = uniform(12, 12, 255);
        for y in 4..7 {
            for x in 2..10 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        for out in [morph_open(&img, 2), morph_close(&img, 2)] {
            assert_eq!(out, img);
        }
    }

    #[test]
    fn opening_removes_isolated_speck() {
        let mut img = uniform(9, 9, 0);
        img.put_pixel(4, 4, Luma([255]));
        assert!(morph_open(&img, 2).pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn sobel_of_flat_image_is_black() {
        assert!(sobel_magnitude(&uniform(6, 6, 77)).pixels().all(|p| p.0[0] == 0));
        let edges = sobel_magnitude(&bar_image());
        assert_eq!(edges.pixels().map(|p| p.0[0]).max(), Some(255));
    }

    #[test]
    fn weighted_sum_saturates() {
        let a = uniform(2, 2, 200);
        let b = uniform(2, 2, 10);
        assert_eq!(weighted_sum(&a, 1.5, &b, -0.5).get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn png_round_trip_keeps_dimensions() {
        let png = encode_png(&bar_image()).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.to_rgb8().dimensions(), (40, 20));
    }
}
