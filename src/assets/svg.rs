//! SVG inspection and color substitution.
//!
//! A color map substitutes exact color values of `fill` and `stroke`, whether written as
//! attributes or inside a `style` attribute. Two implementations: [`remap_colors_str`] rewrites
//! the markup with regexes and never parses it, [`remap_colors_tree`] walks the element tree with
//! quick-xml and is used when the map also asks for attributes to be added to the root `<svg>`
//! (the `"fill"` and `"stroke"` keys). [`remap_colors`] picks between them.

use once_cell::sync::Lazy;
use quick_xml::{
    events::{BytesStart, Event},
    Reader, Writer,
};
use regex::{Captures, Regex};
use std::io::Cursor;

use crate::{assets::reference::ColorMap, error::SceneDocError, scene::Size};

/// Map keys that set a color on the root element instead of substituting one.
const ROOT_KEYS: [&str; 2] = ["fill", "stroke"];

static ATTRIBUTE_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\s)(fill|stroke)(\s*=\s*)"([^"]*)""#).expect("static"));

static STYLE_ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\s)style(\s*=\s*)"([^"]*)""#).expect("static"));

static STYLE_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[;\s])(fill|stroke)(\s*:\s*)([^;]+)").expect("static"));

fn lookup<'m>(map: &'m ColorMap, color: &str) -> Option<&'m str> {
    let wanted = color.trim().to_lowercase();
    map.iter()
        .filter(|(key, _)| !ROOT_KEYS.contains(&key.as_str()))
        .find(|(key, _)| key.trim().to_lowercase() == wanted)
        .map(|(_, value)| value.as_str())
}

fn remap_style(style: &str, map: &ColorMap) -> String {
    STYLE_COLOR
        .replace_all(style, |caps: &Captures| match lookup(map, &caps[4]) {
            Some(to) => format!("{}{}{}{}", &caps[1], &caps[2], &caps[3], to),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Substitute colors without parsing the markup.
pub fn remap_colors_str(svg: &str, map: &ColorMap) -> String {
    let attributes = ATTRIBUTE_COLOR.replace_all(svg, |caps: &Captures| {
        match lookup(map, &caps[4]) {
            Some(to) => format!("{}{}{}\"{}\"", &caps[1], &caps[2], &caps[3], to),
            None => caps[0].to_string(),
        }
    });
    STYLE_ATTRIBUTE
        .replace_all(&attributes, |caps: &Captures| {
            format!("{}style{}\"{}\"", &caps[1], &caps[2], remap_style(&caps[3], map))
        })
        .into_owned()
}

fn remap_element(
    element: &BytesStart<'_>,
    map: &ColorMap,
    is_root: bool,
) -> Result<BytesStart<'static>, SceneDocError> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    let mut seen_root_keys: Vec<&str> = Vec::new();
    for attribute in element.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value()?.into_owned();
        let value = match key.as_str() {
            "fill" | "stroke" if is_root && map.contains_key(key.as_str()) => {
                seen_root_keys.push(if key == "fill" { "fill" } else { "stroke" });
                map[key.as_str()].clone()
            }
            "fill" | "stroke" => lookup(map, &value).map(str::to_string).unwrap_or(value),
            "style" => remap_style(&value, map),
            _ => value,
        };
        out.push_attribute((key.as_str(), value.as_str()));
    }
    if is_root {
        for key in ROOT_KEYS {
            if let Some(value) = map.get(key).filter(|_| !seen_root_keys.contains(&key)) {
                out.push_attribute((key, value.as_str()));
            }
        }
    }
    Ok(out)
}

/// Substitute colors by rewriting the element tree.
pub fn remap_colors_tree(svg: &str, map: &ColorMap) -> Result<String, SceneDocError> {
    let mut reader = Reader::from_str(svg);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut seen_root = false;
    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(element) => {
                let is_root = !seen_root && element.name().as_ref() == b"svg";
                seen_root |= is_root;
                writer.write_event(Event::Start(remap_element(&element, map, is_root)?))?;
            }
            Event::Empty(element) => {
                let is_root = !seen_root && element.name().as_ref() == b"svg";
                seen_root |= is_root;
                writer.write_event(Event::Empty(remap_element(&element, map, is_root)?))?;
            }
            other => writer.write_event(other)?,
        }
    }
    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}

pub fn remap_colors(svg: &str, map: &ColorMap) -> Result<String, SceneDocError> {
    if map.is_empty() {
        return Ok(svg.to_string());
    }
    if ROOT_KEYS.iter().any(|key| map.contains_key(*key)) {
        remap_colors_tree(svg, map)
    } else {
        Ok(remap_colors_str(svg, map))
    }
}

fn parse_length(value: &str) -> Option<f64> {
    let trimmed = value.trim().trim_end_matches("px");
    if trimmed.ends_with('%') {
        return None;
    }
    trimmed.parse().ok()
}

/// Size of an SVG from its root `width`/`height`, falling back to the `viewBox`.
pub fn svg_natural_size(svg: &str) -> Option<Size> {
    let mut reader = Reader::from_str(svg);
    loop {
        match reader.read_event().ok()? {
            Event::Start(element) | Event::Empty(element) if element.name().as_ref() == b"svg" => {
                let mut width = None;
                let mut height = None;
                let mut view_box = None;
                for attribute in element.attributes().flatten() {
                    let value = attribute.unescape_value().ok()?.into_owned();
                    match attribute.key.as_ref() {
                        b"width" => width = parse_length(&value),
                        b"height" => height = parse_length(&value),
                        b"viewBox" => {
                            let numbers: Vec<f64> = value
                                .split(|c: char| c.is_whitespace() || c == ',')
                                .filter(|s| !s.is_empty())
                                .filter_map(|s| s.parse().ok())
                                .collect();
                            if numbers.len() == 4 {
                                view_box = Some(Size::new(numbers[2], numbers[3]));
                            }
                        }
                        _ => {}
                    }
                }
                return match (width, height, view_box) {
                    (Some(w), Some(h), _) => Some(Size::new(w, h)),
                    (_, _, Some(size)) => Some(size),
                    _ => None,
                };
            }
            Event::Eof => return None,
            _ => {}
        }
    }
}
