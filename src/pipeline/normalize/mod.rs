//! Artifact Normalizer: one uploaded file -> ordered page images.
//!
//! PDFs are rasterized one image per page at `pdf_scale_factor`; JPEG/PNG
//! files decode to a single page. Everything else is unsupported.

pub mod pdfium;

pub use pdfium::{MockRasterizer, PdfiumRasterizer};

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use thiserror::Error;

use crate::models::{ArtifactKind, DocumentStatus};

/// Failures that isolate one document. Each maps to a status marker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArtifactError {
    #[error("Download failed for {key}: {reason}")]
    Download { key: String, reason: String },

    #[error("Unsupported artifact kind for {key}")]
    UnsupportedKind { key: String },

    #[error("PDF conversion failed: {0}")]
    PdfConversion(String),

    #[error("Image decode failed: {0}")]
    ImageDecode(String),

    #[error("Artifact produced no pages")]
    NoPages,

    #[error("Processing cancelled")]
    Cancelled,
}

impl ArtifactError {
    pub fn status(&self) -> DocumentStatus {
        match self {
            Self::Download { .. } => DocumentStatus::FailedDownload,
            Self::UnsupportedKind { .. } => DocumentStatus::UnsupportedKind,
            Self::PdfConversion(_) => DocumentStatus::FailedPdfConversion,
            Self::ImageDecode(_) => DocumentStatus::FailedImageDecode,
            Self::NoPages => DocumentStatus::NoPages,
            Self::Cancelled => DocumentStatus::Cancelled,
        }
    }
}

/// One decoded page, PNG-encoded for the extraction model.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based page number within the artifact.
    pub page_index: usize,
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

impl PageImage {
    pub fn from_image(page_index: usize, image: &DynamicImage) -> Result<Self, String> {
        let (width, height) = image.dimensions();
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .map_err(|e| format!("PNG encoding failed: {e}"))?;
        Ok(Self {
            page_index,
            width,
            height,
            png: cursor.into_inner(),
        })
    }
}

/// PDF -> page bitmaps. Implementations are blocking.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(
        &self,
        pdf_bytes: &[u8],
        scale_factor: f32,
        max_dimension_px: u32,
    ) -> Result<Vec<PageImage>, ArtifactError>;
}

pub struct ArtifactNormalizer {
    rasterizer: Arc<dyn PageRasterizer>,
    scale_factor: f32,
    max_dimension_px: u32,
}

impl ArtifactNormalizer {
    pub fn new(rasterizer: Arc<dyn PageRasterizer>, scale_factor: f32, max_dimension_px: u32) -> Self {
        Self {
            rasterizer,
            scale_factor,
            max_dimension_px,
        }
    }

    /// Decode one artifact into its pages, in page order.
    pub fn normalize(
        &self,
        bytes: &[u8],
        kind: ArtifactKind,
        key: &str,
    ) -> Result<Vec<PageImage>, ArtifactError> {
        let pages = match kind {
            ArtifactKind::Document => {
                self.rasterizer
                    .rasterize(bytes, self.scale_factor, self.max_dimension_px)?
            }
            ArtifactKind::Image => vec![decode_image(bytes)?],
            ArtifactKind::Other => {
                return Err(ArtifactError::UnsupportedKind {
                    key: key.to_string(),
                })
            }
        };

        if pages.is_empty() {
            return Err(ArtifactError::NoPages);
        }
        tracing::debug!(document = key, pages = pages.len(), "Normalized artifact");
        Ok(pages)
    }
}

fn decode_image(bytes: &[u8]) -> Result<PageImage, ArtifactError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| ArtifactError::ImageDecode(e.to_string()))?;
    PageImage::from_image(1, &image).map_err(ArtifactError::ImageDecode)
}
