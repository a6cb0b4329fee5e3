//! Full-page rasterization of scanned PDFs through the PDFium shared library.

use image::{DynamicImage, GrayImage, Luma};
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::types::{PdfPageRenderer, RenderedPage};
use super::ExtractionError;

/// Longest rendered side. Larger pages are scaled down, aspect kept.
const MAX_SIDE_PX: u32 = 4096;

const POINTS_PER_INCH: f64 = 72.0;

/// Env var naming an explicit PDFium library file.
const LIBRARY_PATH_VAR: &str = "PDFIUM_DYNAMIC_LIB_PATH";

/// `Pdfium` itself is `!Send`, so the renderer only remembers that the
/// library loads and binds a fresh instance per document.
pub struct PdfiumRenderer;

impl PdfiumRenderer {
    pub fn new() -> Result<Self, ExtractionError> {
        bind_pdfium()?;
        Ok(Self)
    }
}

fn library_error(reason: String) -> ExtractionError {
    ExtractionError::PdfRendering { page: 0, reason }
}

/// Explicit path from the environment, then next to the executable, then
/// the system search path.
fn bind_pdfium() -> Result<Pdfium, ExtractionError> {
    if let Ok(path) = std::env::var(LIBRARY_PATH_VAR) {
        let bindings = Pdfium::bind_to_library(&path)
            .map_err(|e| library_error(format!("Cannot load PDFium from {path}: {e}")))?;
        return Ok(Pdfium::new(bindings));
    }

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()));
    if let Some(dir) = exe_dir {
        let candidate = Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
        if let Ok(bindings) = Pdfium::bind_to_library(&candidate) {
            debug!(dir = %dir.display(), "PDFium found next to the executable");
            return Ok(Pdfium::new(bindings));
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| library_error(format!("PDFium not found (set {LIBRARY_PATH_VAR}): {e}")))
}

/// Pixel size of a page at `dpi`, at least 1x1, longest side capped.
pub fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = f64::from(dpi) / POINTS_PER_INCH;
    let w = (f64::from(width_points) * scale).max(1.0);
    let h = (f64::from(height_points) * scale).max(1.0);
    let shrink = (f64::from(MAX_SIDE_PX) / w.max(h)).min(1.0);
    (
        ((w * shrink).round() as u32).clamp(1, MAX_SIDE_PX),
        ((h * shrink).round() as u32).clamp(1, MAX_SIDE_PX),
    )
}

fn render_one(page: &PdfPage, index: usize, dpi: u32) -> RenderedPage {
    let (width, height) = compute_render_dimensions(page.width().value, page.height().value, dpi);
    if width.max(height) == MAX_SIDE_PX {
        warn!(page = index + 1, dpi, "Page scaled down to {MAX_SIDE_PX}px");
    }
    let config = PdfRenderConfig::new()
        .set_target_width(width as i32)
        .set_maximum_height(height as i32);
    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| ExtractionError::PdfRendering {
            page: index,
            reason: e.to_string(),
        })?;
    debug!(page = index + 1, width, height, "Page rasterized");
    Ok(bitmap.as_image())
}

impl PdfPageRenderer for PdfiumRenderer {
    fn render_pages(&self, pdf_bytes: &[u8], dpi: u32) -> Result<Vec<RenderedPage>, ExtractionError> {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(|e| match e {
                PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
                    ExtractionError::PdfEncrypted
                }
                other => ExtractionError::PdfParsing(other.to_string()),
            })?;

        Ok(document
            .pages()
            .iter()
            .enumerate()
            .map(|(index, page)| render_one(&page, index, dpi))
            .collect())
    }
}

// ── Mock ──

/// White pages, optionally with some pages failing, for tests that must not
/// depend on the PDFium binary.
pub struct MockPdfPageRenderer {
    page_count: usize,
    failing_pages: Vec<usize>,
}

impl MockPdfPageRenderer {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            failing_pages: Vec::new(),
        }
    }

    pub fn with_failing_page(mut self, page: usize) -> Self {
        self.failing_pages.push(page);
        self
    }
}

impl PdfPageRenderer for MockPdfPageRenderer {
    fn render_pages(&self, _pdf_bytes: &[u8], _dpi: u32) -> Result<Vec<RenderedPage>, ExtractionError> {
        Ok((0..self.page_count)
            .map(|page| {
                if self.failing_pages.contains(&page) {
                    Err(ExtractionError::PdfRendering {
                        page,
                        reason: "mock failure".into(),
                    })
                } else {
                    Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([255]))))
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    #[test]
    fn a4_at_300dpi() {
        let (w, h) = compute_render_dimensions(595.0, 842.0, 300);
        assert_eq!((w, h), (2479, 3508));
    }

    #[test]
    fn letter_at_300dpi() {
        assert_eq!(compute_render_dimensions(612.0, 792.0, 300), (2550, 3300));
    }

    #[test]
    fn oversized_pages_keep_their_aspect() {
        let (w, h) = compute_render_dimensions(5000.0, 10000.0, 300);
        assert_eq!(h, MAX_SIDE_PX);
        assert_eq!(w, MAX_SIDE_PX / 2);
    }

    #[test]
    fn degenerate_page_is_at_least_one_pixel() {
        assert_eq!(compute_render_dimensions(0.0, 0.0, 300), (1, 1));
    }

    #[test]
    fn mock_fails_only_the_marked_page() {
        let pages = MockPdfPageRenderer::new(3)
            .with_failing_page(1)
            .render_pages(&[], 300)
            .unwrap();
        assert_eq!(pages.len(), 3);
        assert!(pages[0].is_ok());
        assert!(matches!(pages[1], Err(ExtractionError::PdfRendering { page: 1, .. })));
        assert_eq!(pages[2].as_ref().unwrap().width(), 64);
    }
}
