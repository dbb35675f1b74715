//! PDF rasterisation: downloaded bytes → one PNG per page.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto the blocking
//! thread pool, so CPU-heavy rendering never stalls the workers' network
//! I/O.
//!
//! ## Why cap pixels?
//!
//! Scan sizes vary wildly: an A0 plan at print resolution would rasterise
//! to a pixel buffer in the hundreds of megabytes. `max_pixels` caps the
//! longest edge regardless of physical size, which also matches the input
//! sweet spot of local vision models (1,024–2,048 px).

use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use tracing::debug;

use crate::cache::PageSet;
use crate::error::RenderError;

/// Renders a document's original bytes into page images.
///
/// The trait seam exists for the same reason as [`crate::store::DocumentStore`]:
/// the pipeline is exercised in tests without a pdfium library present.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn rasterize(&self, bytes: Vec<u8>) -> Result<PageSet, RenderError>;
}

/// pdfium-backed renderer.
pub struct PdfiumRenderer {
    max_pixels: u32,
    page_limit: Option<usize>,
}

impl PdfiumRenderer {
    pub fn new(max_pixels: u32, page_limit: Option<usize>) -> Self {
        Self {
            max_pixels,
            page_limit,
        }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn rasterize(&self, bytes: Vec<u8>) -> Result<PageSet, RenderError> {
        let max_pixels = self.max_pixels;
        let page_limit = self.page_limit;

        tokio::task::spawn_blocking(move || {
            rasterize_blocking(&bytes, max_pixels, page_limit)
        })
        .await
        .map_err(|e| RenderError::Corrupt(format!("render task panicked: {e}")))?
    }
}

/// Blocking implementation of page rendering.
fn rasterize_blocking(
    bytes: &[u8],
    max_pixels: u32,
    page_limit: Option<usize>,
) -> Result<PageSet, RenderError> {
    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| RenderError::Corrupt(format!("{e:?}")))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let render_count = match page_limit {
        Some(limit) => total_pages.min(limit),
        None => total_pages,
    };
    debug!(
        "document loaded: {} pages, rendering {}",
        total_pages, render_count
    );

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(render_count);
    for idx in 0..render_count {
        let page = pages.get(idx as u16).map_err(|e| RenderError::Page {
            page: idx + 1,
            detail: format!("{e:?}"),
        })?;

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::Page {
                page: idx + 1,
                detail: format!("{e:?}"),
            })?;

        let png = encode_png(&bitmap.as_image()).map_err(|e| RenderError::Encode {
            page: idx + 1,
            detail: e.to_string(),
        })?;
        debug!("rendered page {} → {} bytes png", idx + 1, png.len());
        images.push(png);
    }

    Ok(PageSet {
        images,
        total_pages,
    })
}

/// PNG-encode a rendered page.
///
/// PNG over JPEG because it is lossless — compression artefacts on rendered
/// text measurably degrade what a vision model can read.
fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}
