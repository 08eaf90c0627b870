//! Plain documents embedded as images.
//!
//! The document is converted to HTML and wrapped in an SVG `foreignObject`. Width comes from
//! the caller; height is estimated from the wrapped text and capped.

use pulldown_cmark::{html, Event, Options, Parser, Tag, TagEnd};

use crate::{
    config::MarkdownEmbedConfig,
    host::ThemeStyles,
    scene::{Size, Theme},
};

const PADDING: f64 = 10.0;
const LINE_SPACING: f64 = 1.5;
/// Average glyph advance relative to the font size.
const GLYPH_WIDTH: f64 = 0.55;

#[derive(Debug, Clone, PartialEq)]
pub struct MarkdownImage {
    pub svg: String,
    pub size: Size,
}

fn parser_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
}

/// Text lines the rendered document will roughly occupy at `columns` characters per line.
fn estimate_lines(markdown: &str, columns: usize) -> usize {
    let mut lines = 0;
    let mut current = 0usize;
    let flush = |current: &mut usize, lines: &mut usize| {
        if *current > 0 {
            *lines += current.div_ceil(columns.max(1));
            *current = 0;
        }
    };
    for event in Parser::new_ext(markdown, parser_options()) {
        match event {
            Event::Text(text) | Event::Code(text) => current += text.chars().count(),
            Event::SoftBreak => current += 1,
            Event::HardBreak => flush(&mut current, &mut lines),
            Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item) => {
                flush(&mut current, &mut lines);
                lines += 1;
            }
            Event::Start(Tag::Image { .. }) => lines += 4,
            Event::Rule => lines += 1,
            _ => {}
        }
    }
    flush(&mut current, &mut lines);
    lines.max(1)
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

pub fn render_markdown_svg(
    markdown: &str,
    config: &MarkdownEmbedConfig,
    theme: Theme,
    styles: Option<&ThemeStyles>,
) -> MarkdownImage {
    let mut body = String::new();
    html::push_html(&mut body, Parser::new_ext(markdown, parser_options()));

    let width = config.width.max(1.0);
    let columns = ((width - 2.0 * PADDING) / (config.font_size * GLYPH_WIDTH)).floor() as usize;
    let natural_height =
        estimate_lines(markdown, columns) as f64 * config.font_size * LINE_SPACING + 2.0 * PADDING;
    let height = natural_height.min(config.max_height).ceil();

    let color = match theme {
        Theme::Light => "#1e1e1e",
        Theme::Dark => "#e3e3e3",
    };
    let border = config
        .border
        .as_deref()
        .map(|b| format!("border:{};", escape_attribute(b)))
        .unwrap_or_default();
    let style_block = styles
        .map(|s| format!("<defs><style>{}{}</style></defs>", s.font_faces, s.css))
        .unwrap_or_default();

    let svg = format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            "{style}",
            r#"<foreignObject x="0" y="0" width="{w}" height="{h}">"#,
            r#"<div xmlns="http://www.w3.org/1999/xhtml" class="markdown-embed theme-{theme}" "#,
            r#"style="box-sizing:border-box;width:{w}px;height:{h}px;overflow:hidden;padding:{p}px;"#,
            r#"color:{color};font-family:{font};font-size:{size}px;{border}">"#,
            "{body}</div></foreignObject></svg>"
        ),
        w = width,
        h = height,
        p = PADDING,
        style = style_block,
        theme = theme,
        color = color,
        font = escape_attribute(&config.font_family),
        size = config.font_size,
        border = border,
        body = body,
    );
    MarkdownImage {
        svg,
        size: Size::new(width, height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_html_inside_foreign_object() {
        let image = render_markdown_svg(
            "# Title\n\nSome *text*.",
            &MarkdownEmbedConfig::default(),
            Theme::Dark,
            Some(&ThemeStyles {
                css: ".x{}".to_string(),
                font_faces: String::new(),
            }),
        );
        assert!(image.svg.contains("<h1>Title</h1>"));
        assert!(image.svg.contains("<em>text</em>"));
        assert!(image.svg.contains("theme-dark"));
        assert!(image.svg.contains("<style>.x{}</style>"));
        assert_eq!(image.size.width, 500.0);
    }

    #[test]
    fn height_grows_until_the_cap() {
        let config = MarkdownEmbedConfig {
            max_height: 300.0,
            ..MarkdownEmbedConfig::default()
        };
        let short = render_markdown_svg("one line", &config, Theme::Light, None);
        let longer = render_markdown_svg("a\n\nb\n\nc\n\nd", &config, Theme::Light, None);
        let huge = render_markdown_svg(&"word ".repeat(2000), &config, Theme::Light, None);
        assert!(short.size.height < longer.size.height);
        assert_eq!(huge.size.height, 300.0);
    }
}
