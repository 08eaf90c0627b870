//! PDF page embeds: `file.pdf#page=N` with an optional `&rect=x1,y1,x2,y2` crop in page space.

use image::{DynamicImage, GenericImageView, ImageFormat};
use std::{io::Cursor, time::Duration};

use crate::{
    config::PdfConfig,
    error::SceneDocError,
    host::{RenderBackend, RenderedPage},
    scene::Size,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfTarget {
    /// 1-based page number.
    pub page: u32,
    /// Crop rectangle in PDF points, origin bottom-left, as `[x1, y1, x2, y2]`.
    pub rect: Option<[f64; 4]>,
}

impl PdfTarget {
    pub fn parse(subpart: Option<&str>) -> PdfTarget {
        let mut target = PdfTarget { page: 1, rect: None };
        for pair in subpart.unwrap_or_default().split('&') {
            match pair.split_once('=') {
                Some(("page", n)) => target.page = n.trim().parse().unwrap_or(1).max(1),
                Some(("rect", coords)) => {
                    let numbers: Vec<f64> = coords
                        .split(',')
                        .filter_map(|n| n.trim().parse().ok())
                        .collect();
                    if let [x1, y1, x2, y2] = numbers[..] {
                        target.rect = Some([x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)]);
                    }
                }
                _ => {}
            }
        }
        target
    }
}

/// Crop region in rendered pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Map a page-space rectangle onto the rendered (rotated, scaled) page.
pub fn crop_to_pixels(rect: [f64; 4], page: &RenderedPage, scale: f64) -> PixelRect {
    let [x1, y1, x2, y2] = rect;
    let (w, h) = (page.width_pt, page.height_pt);
    let (left, top, width, height) = match page.rotation % 360 {
        90 => (y1, x1, y2 - y1, x2 - x1),
        180 => (w - x2, y1, x2 - x1, y2 - y1),
        270 => (h - y2, w - x2, y2 - y1, x2 - x1),
        _ => (x1, h - y2, x2 - x1, y2 - y1),
    };
    PixelRect {
        left: left * scale,
        top: top * scale,
        width: width * scale,
        height: height * scale,
    }
}

/// Render a page, retrying failures. Attempt `n` is followed by a `n * backoff_ms` pause.
pub async fn render_page_with_retry(
    renderer: &dyn RenderBackend,
    pdf: &[u8],
    page: u32,
    config: &PdfConfig,
) -> Result<RenderedPage, SceneDocError> {
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match renderer.render_pdf_page(pdf, page, config.scale).await {
            Ok(rendered) => return Ok(rendered),
            Err(e @ SceneDocError::Unsupported(_)) => return Err(e),
            Err(e) if attempt >= attempts => {
                tracing::warn!("[PdfRender] page {page} failed after {attempt} attempts: {e}");
                return Err(e);
            }
            Err(e) => {
                tracing::debug!("[PdfRender] page {page} attempt {attempt} failed: {e}");
                tokio::time::sleep(Duration::from_millis(config.backoff_ms * attempt as u64))
                    .await;
                attempt += 1;
            }
        }
    }
}

/// Cut `rect` out of a PNG, clamped to the image. Returns the new PNG and its size.
pub fn crop_png(png: &[u8], rect: PixelRect) -> Result<(Vec<u8>, Size), SceneDocError> {
    let image = image::load_from_memory_with_format(png, ImageFormat::Png)?;
    crop_image(&image, rect)
}

fn crop_image(image: &DynamicImage, rect: PixelRect) -> Result<(Vec<u8>, Size), SceneDocError> {
    let (img_w, img_h) = image.dimensions();
    if img_w == 0 || img_h == 0 {
        return Err(SceneDocError::Render(format!(
            "cannot crop an empty {img_w}x{img_h} page"
        )));
    }
    let left = (rect.left.max(0.0).round() as u32).min(img_w - 1);
    let top = (rect.top.max(0.0).round() as u32).min(img_h - 1);
    let width = (rect.width.round().max(1.0) as u32).min(img_w - left);
    let height = (rect.height.round().max(1.0) as u32).min(img_h - top);
    let cropped = image.crop_imm(left, top, width, height);
    let mut out = Cursor::new(Vec::new());
    cropped.write_to(&mut out, ImageFormat::Png)?;
    Ok((out.into_inner(), Size::new(width as f64, height as f64)))
}

/// Render the targeted page and apply its crop.
pub async fn render_pdf_target(
    renderer: &dyn RenderBackend,
    pdf: &[u8],
    target: PdfTarget,
    config: &PdfConfig,
) -> Result<(Vec<u8>, Size), SceneDocError> {
    let page = render_page_with_retry(renderer, pdf, target.page, config).await?;
    match target.rect {
        Some(rect) => crop_png(&page.png, crop_to_pixels(rect, &page, config.scale)),
        None => {
            let (w, h) = image::load_from_memory_with_format(&page.png, ImageFormat::Png)?
                .dimensions();
            Ok((page.png, Size::new(w as f64, h as f64)))
        }
    }
}
