//! PDF rasterization via Google PDFium.
//!
//! `PdfiumRasterizer` is stateless (`Send + Sync`). Each call binds a fresh
//! `Pdfium` instance because the upstream type is `!Send`; the OS caches
//! the dynamic library load.

use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::{ArtifactError, PageImage, PageRasterizer};

pub struct PdfiumRasterizer;

impl PdfiumRasterizer {
    /// Verifies the PDFium library is loadable.
    ///
    /// Discovery order:
    /// 1. `PDFIUM_DYNAMIC_LIB_PATH` env var (explicit path to library file)
    /// 2. Alongside the running executable
    /// 3. System library search paths
    pub fn new() -> Result<Self, ArtifactError> {
        let _ = load_pdfium()?;
        Ok(Self)
    }
}

fn load_pdfium() -> Result<Pdfium, ArtifactError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
            ArtifactError::PdfConversion(format!("Failed to load PDFium from {path}: {e}"))
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
    {
        let lib_path =
            Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
        if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
            debug!(dir = %exe_dir.display(), "Loaded PDFium next to executable");
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| {
        ArtifactError::PdfConversion(format!(
            "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

fn map_load_error(e: PdfiumError) -> ArtifactError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ArtifactError::PdfConversion("PDF is password-protected".into())
    } else {
        ArtifactError::PdfConversion(format!("Failed to load PDF: {msg}"))
    }
}

/// Pixel dimensions for a page at `scale`, both clamped to [1, max_dim].
/// Aspect ratio is preserved when capping.
fn compute_render_dimensions(
    width_points: f32,
    height_points: f32,
    scale: f32,
    max_dim: u32,
) -> (u32, u32) {
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let largest = raw_w.max(raw_h);
    if largest > max_dim as f32 {
        let ratio = max_dim as f32 / largest;
        let w = ((raw_w * ratio) as u32).clamp(1, max_dim);
        let h = ((raw_h * ratio) as u32).clamp(1, max_dim);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        pdf_bytes: &[u8],
        scale_factor: f32,
        max_dimension_px: u32,
    ) -> Result<Vec<PageImage>, ArtifactError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;

        let mut pages = Vec::new();
        for (i, page) in document.pages().iter().enumerate() {
            let page_index = i + 1;
            let width_points = page.width().value;
            let height_points = page.height().value;
            let (target_w, target_h) = compute_render_dimensions(
                width_points,
                height_points,
                scale_factor,
                max_dimension_px,
            );

            let uncapped_w = (width_points * scale_factor) as u32;
            let uncapped_h = (height_points * scale_factor) as u32;
            if target_w != uncapped_w || target_h != uncapped_h {
                warn!(
                    page = page_index,
                    raw_width = uncapped_w,
                    raw_height = uncapped_h,
                    capped_width = target_w,
                    capped_height = target_h,
                    "Page dimensions capped to {max_dimension_px}px",
                );
            }

            let config = PdfRenderConfig::new()
                .set_target_width(target_w as i32)
                .set_maximum_height(target_h as i32);

            let bitmap = page.render_with_config(&config).map_err(|e| {
                ArtifactError::PdfConversion(format!("Rendering page {page_index} failed: {e}"))
            })?;

            let image = PageImage::from_image(page_index, &bitmap.as_image())
                .map_err(ArtifactError::PdfConversion)?;

            debug!(
                page = page_index,
                width = image.width,
                height = image.height,
                png_size = image.png.len(),
                "Rendered PDF page"
            );
            pages.push(image);
        }

        Ok(pages)
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Rasterizer returning `page_count` blank pages, or a fixed failure.
/// Lets pipeline tests run without the PDFium binary.
pub struct MockRasterizer {
    page_count: usize,
    failure: Option<String>,
}

impl MockRasterizer {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            failure: None,
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            page_count: 0,
            failure: Some(reason.to_string()),
        }
    }
}

impl PageRasterizer for MockRasterizer {
    fn rasterize(
        &self,
        _pdf_bytes: &[u8],
        _scale_factor: f32,
        _max_dimension_px: u32,
    ) -> Result<Vec<PageImage>, ArtifactError> {
        if let Some(reason) = &self.failure {
            return Err(ArtifactError::PdfConversion(reason.clone()));
        }
        let blank = DynamicImage::new_rgb8(2, 2);
        (1..=self.page_count)
            .map(|i| PageImage::from_image(i, &blank).map_err(ArtifactError::PdfConversion))
            .collect()
    }
}
