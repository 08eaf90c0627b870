//! Text element geometry after its display text changes.
//!
//! Font metrics belong to the host, so measuring goes through [`TextMeasurer`]. The default
//! [`ApproxMeasurer`] uses a fixed advance per character, which is enough to keep the saved
//! geometry consistent and deterministic when no renderer is attached.

use crate::{
    link::wrap_text,
    scene::{Element, Size, TextAlign, TextData, VerticalAlign},
};

/// Distance between a container's edge and its bound text.
pub const BOUND_TEXT_PADDING: f64 = 5.0;

pub trait TextMeasurer: Send + Sync {
    /// Size of `text` rendered without wrapping.
    fn measure(&self, text: &str, font_size: f64, line_height: f64) -> Size;

    /// Characters of this font that fit in `width`.
    fn columns(&self, width: f64, font_size: f64) -> usize;
}

/// Monospace approximation: every character advances `0.6 * font_size`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxMeasurer;

const ADVANCE: f64 = 0.6;

impl TextMeasurer for ApproxMeasurer {
    fn measure(&self, text: &str, font_size: f64, line_height: f64) -> Size {
        let lines: Vec<&str> = text.split('\n').collect();
        let longest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
        Size::new(
            longest as f64 * font_size * ADVANCE,
            lines.len() as f64 * font_size * line_height,
        )
    }

    fn columns(&self, width: f64, font_size: f64) -> usize {
        if font_size <= 0.0 {
            return 0;
        }
        ((width / (font_size * ADVANCE)).floor() as usize).max(1)
    }
}

/// New geometry for a text element and, when the text outgrew it, its container.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLayout {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub container_height: Option<f64>,
}

/// Lay out `display` in `element`, bound inside `container` when there is one.
pub fn layout_text(
    element: &Element,
    container: Option<&Element>,
    display: &str,
    measurer: &dyn TextMeasurer,
) -> Option<TextLayout> {
    let data = element.text()?;
    Some(match container {
        Some(container) => layout_bound(data, container, display, measurer),
        None => layout_free(element, data, display, measurer),
    })
}

fn layout_free(
    element: &Element,
    data: &TextData,
    display: &str,
    measurer: &dyn TextMeasurer,
) -> TextLayout {
    if data.auto_resize {
        let size = measurer.measure(display, data.font_size, data.line_height);
        let x = match data.text_align {
            TextAlign::Left => element.x,
            TextAlign::Center => element.x + (element.width - size.width) / 2.0,
            TextAlign::Right => element.x + element.width - size.width,
        };
        TextLayout {
            text: display.to_string(),
            x,
            y: element.y,
            width: size.width,
            height: size.height,
            container_height: None,
        }
    } else {
        let wrapped = wrap_text(display, measurer.columns(element.width, data.font_size));
        let size = measurer.measure(&wrapped, data.font_size, data.line_height);
        TextLayout {
            text: wrapped,
            x: element.x,
            y: element.y,
            width: element.width,
            height: size.height,
            container_height: None,
        }
    }
}

fn layout_bound(
    data: &TextData,
    container: &Element,
    display: &str,
    measurer: &dyn TextMeasurer,
) -> TextLayout {
    let max_width = (container.width - 2.0 * BOUND_TEXT_PADDING).max(0.0);
    let wrapped = wrap_text(display, measurer.columns(max_width, data.font_size));
    let size = measurer.measure(&wrapped, data.font_size, data.line_height);
    let width = size.width.min(max_width);

    let needed = size.height + 2.0 * BOUND_TEXT_PADDING;
    let container_height = (needed > container.height).then_some(needed);
    let height_available = container_height.unwrap_or(container.height);

    let x = match data.text_align {
        TextAlign::Left => container.x + BOUND_TEXT_PADDING,
        TextAlign::Center => container.x + (container.width - width) / 2.0,
        TextAlign::Right => container.x + container.width - BOUND_TEXT_PADDING - width,
    };
    let y = match data.vertical_align {
        VerticalAlign::Top => container.y + BOUND_TEXT_PADDING,
        VerticalAlign::Middle => container.y + (height_available - size.height) / 2.0,
        VerticalAlign::Bottom => {
            container.y + height_available - BOUND_TEXT_PADDING - size.height
        }
    };
    TextLayout {
        text: wrapped,
        x,
        y,
        width,
        height: size.height,
        container_height,
    }
}
