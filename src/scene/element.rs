//! Drawable elements.
//!
//! The drawing surface stores elements as loosely typed JSON objects distinguished by a `type`
//! string. Here they are a struct of the fields every element shares plus an [`ElementKind`] sum
//! type for the fields only some kinds carry. Anything this crate does not interpret survives in
//! [`Element::extra`] so a load/save cycle never drops geometry or style.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::SceneDocError,
    ids::{AssetId, ElementId},
};

pub const DEFAULT_FONT_SIZE: f64 = 20.0;
pub const DEFAULT_LINE_HEIGHT: f64 = 1.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerticalAlign {
    #[default]
    Top,
    Middle,
    Bottom,
}

/// Entry of an element's `boundElements` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundElement {
    pub id: ElementId,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Arrow endpoint attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointBinding {
    pub element_id: ElementId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextData {
    /// What the drawing surface displays (possibly wrapped).
    pub text: String,
    /// Display text before wrapping.
    pub original_text: String,
    /// Unresolved markup, as written in the document.
    pub raw_text: String,
    pub container_id: Option<ElementId>,
    pub font_size: f64,
    pub line_height: f64,
    pub text_align: TextAlign,
    pub vertical_align: VerticalAlign,
    /// When false the element keeps its width and text wraps inside it.
    pub auto_resize: bool,
}

impl Default for TextData {
    fn default() -> Self {
        TextData {
            text: String::new(),
            original_text: String::new(),
            raw_text: String::new(),
            container_id: None,
            font_size: DEFAULT_FONT_SIZE,
            line_height: DEFAULT_LINE_HEIGHT,
            text_align: TextAlign::Left,
            vertical_align: VerticalAlign::Top,
            auto_resize: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinearData {
    pub start_binding: Option<PointBinding>,
    pub end_binding: Option<PointBinding>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageData {
    pub file_id: Option<AssetId>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameData {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Text(TextData),
    Arrow(LinearData),
    Line(LinearData),
    Image(ImageData),
    Frame(FrameData),
    /// Rectangles, ellipses, freedraw strokes and every other kind whose fields stay opaque.
    Shape(String),
}

impl ElementKind {
    pub fn type_name(&self) -> &str {
        match self {
            ElementKind::Text(_) => "text",
            ElementKind::Arrow(_) => "arrow",
            ElementKind::Line(_) => "line",
            ElementKind::Image(_) => "image",
            ElementKind::Frame(_) => "frame",
            ElementKind::Shape(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Element {
    pub id: ElementId,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub angle: f64,
    pub frame_id: Option<ElementId>,
    pub bound_elements: Option<Vec<BoundElement>>,
    pub group_ids: Vec<String>,
    pub link: Option<String>,
    pub roundness: Option<Value>,
    pub is_deleted: bool,
    pub kind: ElementKind,
    pub extra: Map<String, Value>,
}

impl Element {
    pub fn new(id: ElementId, kind: ElementKind) -> Self {
        Element {
            id,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            angle: 0.0,
            frame_id: None,
            bound_elements: None,
            group_ids: Vec::new(),
            link: None,
            roundness: None,
            is_deleted: false,
            kind,
            extra: Map::new(),
        }
    }

    pub fn text(&self) -> Option<&TextData> {
        match &self.kind {
            ElementKind::Text(data) => Some(data),
            _ => None,
        }
    }

    pub fn text_mut(&mut self) -> Option<&mut TextData> {
        match &mut self.kind {
            ElementKind::Text(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, ElementKind::Text(_))
    }

    pub fn image(&self) -> Option<&ImageData> {
        match &self.kind {
            ElementKind::Image(data) => Some(data),
            _ => None,
        }
    }

    pub fn linear(&self) -> Option<&LinearData> {
        match &self.kind {
            ElementKind::Arrow(data) | ElementKind::Line(data) => Some(data),
            _ => None,
        }
    }

    pub fn linear_mut(&mut self) -> Option<&mut LinearData> {
        match &mut self.kind {
            ElementKind::Arrow(data) | ElementKind::Line(data) => Some(data),
            _ => None,
        }
    }

    pub fn bound_ids(&self) -> impl Iterator<Item = &ElementId> {
        self.bound_elements.iter().flatten().map(|b| &b.id)
    }

    /// Every id this element mentions other than its own.
    pub fn referenced_ids(&self) -> Vec<&ElementId> {
        let mut ids: Vec<&ElementId> = self.bound_ids().collect();
        if let Some(frame) = &self.frame_id {
            ids.push(frame);
        }
        match &self.kind {
            ElementKind::Text(text) => ids.extend(text.container_id.iter()),
            ElementKind::Arrow(linear) | ElementKind::Line(linear) => {
                ids.extend(linear.start_binding.iter().map(|b| &b.element_id));
                ids.extend(linear.end_binding.iter().map(|b| &b.element_id));
            }
            ElementKind::Image(_) | ElementKind::Frame(_) | ElementKind::Shape(_) => {}
        }
        ids
    }
}

fn take_f64(map: &mut Map<String, Value>, key: &str, default: f64) -> f64 {
    map.remove(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

fn take_bool(map: &mut Map<String, Value>, key: &str, default: bool) -> bool {
    map.remove(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn take_id(map: &mut Map<String, Value>, key: &str) -> Option<ElementId> {
    take_string(map, key).map(ElementId::from)
}

fn take_typed<T: for<'de> Deserialize<'de>>(
    map: &mut Map<String, Value>,
    key: &str,
) -> Result<Option<T>, SceneDocError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

fn take_enum<T: for<'de> Deserialize<'de> + Default>(map: &mut Map<String, Value>, key: &str) -> T {
    map.remove(key)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn opt_string(value: Option<impl Into<String>>) -> Value {
    value.map(|s| Value::String(s.into())).unwrap_or(Value::Null)
}

impl TryFrom<Value> for Element {
    type Error = SceneDocError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut map) = value else {
            return Err(SceneDocError::Serialization(
                "Scene element is not a JSON object".to_string(),
            ));
        };
        let id = take_id(&mut map, "id")
            .ok_or_else(|| SceneDocError::Serialization("Scene element without id".to_string()))?;
        let type_name = take_string(&mut map, "type").ok_or_else(|| {
            SceneDocError::Serialization(format!("Scene element {id} has no type"))
        })?;

        let kind = match type_name.as_str() {
            "text" => {
                let text = take_string(&mut map, "text").unwrap_or_default();
                let original_text =
                    take_string(&mut map, "originalText").unwrap_or_else(|| text.clone());
                let raw_text =
                    take_string(&mut map, "rawText").unwrap_or_else(|| original_text.clone());
                ElementKind::Text(TextData {
                    text,
                    original_text,
                    raw_text,
                    container_id: take_id(&mut map, "containerId"),
                    font_size: take_f64(&mut map, "fontSize", DEFAULT_FONT_SIZE),
                    line_height: take_f64(&mut map, "lineHeight", DEFAULT_LINE_HEIGHT),
                    text_align: take_enum(&mut map, "textAlign"),
                    vertical_align: take_enum(&mut map, "verticalAlign"),
                    auto_resize: take_bool(&mut map, "autoResize", true),
                })
            }
            "arrow" | "line" => {
                let linear = LinearData {
                    start_binding: take_typed(&mut map, "startBinding")?,
                    end_binding: take_typed(&mut map, "endBinding")?,
                };
                if type_name == "arrow" {
                    ElementKind::Arrow(linear)
                } else {
                    ElementKind::Line(linear)
                }
            }
            "image" => ElementKind::Image(ImageData {
                file_id: take_string(&mut map, "fileId").map(AssetId::from),
                status: take_string(&mut map, "status").unwrap_or_else(|| "pending".to_string()),
            }),
            "frame" => ElementKind::Frame(FrameData {
                name: take_string(&mut map, "name"),
            }),
            _ => ElementKind::Shape(type_name),
        };

        Ok(Element {
            id,
            x: take_f64(&mut map, "x", 0.0),
            y: take_f64(&mut map, "y", 0.0),
            width: take_f64(&mut map, "width", 0.0),
            height: take_f64(&mut map, "height", 0.0),
            angle: take_f64(&mut map, "angle", 0.0),
            frame_id: take_id(&mut map, "frameId"),
            bound_elements: take_typed(&mut map, "boundElements")?,
            group_ids: take_typed(&mut map, "groupIds")?.unwrap_or_default(),
            link: take_string(&mut map, "link"),
            roundness: map.remove("roundness").filter(|v| !v.is_null()),
            is_deleted: take_bool(&mut map, "isDeleted", false),
            kind,
            extra: map,
        })
    }
}

impl From<Element> for Value {
    fn from(element: Element) -> Value {
        let mut map = element.extra;
        map.insert("id".into(), Value::String(element.id.into()));
        map.insert(
            "type".into(),
            Value::String(element.kind.type_name().to_string()),
        );
        map.insert("x".into(), element.x.into());
        map.insert("y".into(), element.y.into());
        map.insert("width".into(), element.width.into());
        map.insert("height".into(), element.height.into());
        map.insert("angle".into(), element.angle.into());
        map.insert("frameId".into(), opt_string(element.frame_id));
        map.insert(
            "boundElements".into(),
            serde_json::to_value(&element.bound_elements).unwrap_or(Value::Null),
        );
        map.insert(
            "groupIds".into(),
            Value::Array(element.group_ids.into_iter().map(Value::String).collect()),
        );
        map.insert("link".into(), opt_string(element.link));
        map.insert("roundness".into(), element.roundness.unwrap_or(Value::Null));
        map.insert("isDeleted".into(), Value::Bool(element.is_deleted));

        match element.kind {
            ElementKind::Text(text) => {
                map.insert("text".into(), Value::String(text.text));
                map.insert("originalText".into(), Value::String(text.original_text));
                map.insert("rawText".into(), Value::String(text.raw_text));
                map.insert("containerId".into(), opt_string(text.container_id));
                map.insert("fontSize".into(), text.font_size.into());
                map.insert("lineHeight".into(), text.line_height.into());
                map.insert(
                    "textAlign".into(),
                    serde_json::to_value(text.text_align).unwrap_or(Value::Null),
                );
                map.insert(
                    "verticalAlign".into(),
                    serde_json::to_value(text.vertical_align).unwrap_or(Value::Null),
                );
                map.insert("autoResize".into(), Value::Bool(text.auto_resize));
            }
            ElementKind::Arrow(linear) | ElementKind::Line(linear) => {
                map.insert(
                    "startBinding".into(),
                    serde_json::to_value(&linear.start_binding).unwrap_or(Value::Null),
                );
                map.insert(
                    "endBinding".into(),
                    serde_json::to_value(&linear.end_binding).unwrap_or(Value::Null),
                );
            }
            ElementKind::Image(image) => {
                map.insert("fileId".into(), opt_string(image.file_id.map(|f| f.to_string())));
                map.insert("status".into(), Value::String(image.status));
            }
            ElementKind::Frame(frame) => {
                map.insert("name".into(), opt_string(frame.name));
            }
            ElementKind::Shape(_) => {}
        }
        Value::Object(map)
    }
}
