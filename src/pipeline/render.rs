//! Page rasterisation: render single pages to PNG via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! ## Why a fixed scale factor, not DPI?
//!
//! Downstream vision inference cares about legibility of small text, and a
//! uniform 4x scale of the page's native dimensions is what the model was
//! tuned against. Scaling by a factor also keeps output dimensions a pure
//! function of (page, scale), which the cache layer relies on.

use std::path::Path;

use async_trait::async_trait;
use pdfium_render::prelude::*;
use tracing::{debug, info};

use crate::error::{PageError, PagelensError};
use crate::pipeline::encode::encode_png;

/// A rendered page: raster dimensions plus the encoded PNG bytes.
///
/// Immutable once produced, so the session cache hands out `Arc<PageImage>`
/// clones freely.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// Zero-based page index within the document.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    /// Scale factor the page was rendered at.
    pub scale: f32,
    /// PNG-encoded pixels (RGB, white background).
    pub png: Vec<u8>,
}

/// Rendering collaborator: opens documents and rasterises single pages.
///
/// The session store is written against this trait so tests can count and
/// script renders without a pdfium install.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Open (validate) the document and return its page count.
    async fn open(&self, path: &Path) -> Result<usize, PagelensError>;

    /// Rasterise one page at the given scale.
    async fn render_page(
        &self,
        path: &Path,
        index: usize,
        scale: f32,
    ) -> Result<PageImage, PageError>;
}

/// Production renderer backed by pdfium.
#[derive(Debug, Default)]
pub struct PdfiumRenderer;

#[async_trait]
impl DocumentRenderer for PdfiumRenderer {
    async fn open(&self, path: &Path) -> Result<usize, PagelensError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let pdfium = Pdfium::default();
            let document =
                pdfium
                    .load_pdf_from_file(&path, None)
                    .map_err(|e| PagelensError::DocumentLoad {
                        detail: format!("{:?}", e),
                    })?;
            let count = document.pages().len() as usize;
            info!("document opened: {} pages", count);
            Ok(count)
        })
        .await
        .map_err(|e| PagelensError::Internal(format!("open task panicked: {}", e)))?
    }

    async fn render_page(
        &self,
        path: &Path,
        index: usize,
        scale: f32,
    ) -> Result<PageImage, PageError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || render_page_blocking(&path, index, scale))
            .await
            .map_err(|e| PageError::RenderFailed {
                page: index,
                detail: format!("render task panicked: {}", e),
            })?
    }
}

/// Blocking implementation of single-page rendering.
fn render_page_blocking(path: &Path, index: usize, scale: f32) -> Result<PageImage, PageError> {
    let render_err = |detail: String| PageError::RenderFailed {
        page: index,
        detail,
    };

    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| render_err(format!("{:?}", e)))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if index >= total {
        return Err(render_err(format!("page {index} out of range (total {total})")));
    }

    let page = pages
        .get(index as u16)
        .map_err(|e| render_err(format!("{:?}", e)))?;

    // Target dimensions are the page's native point size times the scale
    // factor, so the same page always rasterises to the same raster.
    let width = (page.width().value * scale).round() as i32;
    let height = (page.height().value * scale).round() as i32;

    let render_config = PdfRenderConfig::new()
        .set_target_width(width)
        .set_target_height(height)
        // Vision models want opaque pages; composite any transparency
        // onto white rather than leaving an alpha channel.
        .clear_before_rendering(true)
        .set_clear_color(PdfColor::WHITE);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| render_err(format!("{:?}", e)))?;

    let image = bitmap.as_image().into_rgb8();
    let (width, height) = image.dimensions();
    debug!("rendered page {} at {}x{} px (scale {})", index, width, height, scale);

    let png = encode_png(&image).map_err(|e| PageError::EncodeFailed {
        page: index,
        detail: e.to_string(),
    })?;

    Ok(PageImage {
        index,
        width,
        height,
        scale,
        png,
    })
}
