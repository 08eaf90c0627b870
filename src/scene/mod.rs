//! The scene graph embedded in a document.
//!
//! A [`Scene`] is the drawing surface's own payload: elements, view state and the transient
//! `files` map used to ferry freshly resolved asset bytes during a save cycle. The element wire
//! format is owned by the drawing library; this crate only interprets the handful of fields it
//! needs for cross-reference bookkeeping (see [`element`]).

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ids::{AssetId, ElementId};

pub mod element;

pub use element::{
    BoundElement, Element, ElementKind, FrameData, ImageData, LinearData, PointBinding, TextAlign,
    TextData, VerticalAlign,
};

pub const SCENE_TYPE: &str = "excalidraw";
pub const SCENE_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl Display for Theme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Size { width, height }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "default_background")]
    pub view_background_color: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_background() -> String {
    "#ffffff".to_string()
}

impl Default for AppState {
    fn default() -> Self {
        AppState {
            theme: Theme::Light,
            view_background_color: default_background(),
            extra: Map::new(),
        }
    }
}

/// A dark render stored next to the light one when the source embeds raster content that cannot
/// be inverted live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemedVariant {
    pub theme: Theme,
    #[serde(rename = "dataURL")]
    pub data_url: String,
}

/// A resolved, inlinable asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineAsset {
    pub mime_type: String,
    #[serde(rename = "dataURL")]
    pub data_url: String,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "created")]
    pub created_at: i64,
    #[serde(default)]
    pub natural_size: Size,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub themed_variant: Option<ThemedVariant>,
}

/// `data:` URL holding `bytes` base64 encoded.
pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

impl InlineAsset {
    pub fn new(mime_type: &str, bytes: &[u8], natural_size: Size) -> Self {
        InlineAsset {
            mime_type: mime_type.to_string(),
            data_url: data_url(mime_type, bytes),
            created_at: now_ms(),
            natural_size,
            themed_variant: None,
        }
    }

    /// Data URL to display for `theme`, preferring a dedicated variant when one exists.
    pub fn data_url_for(&self, theme: Theme) -> &str {
        match &self.themed_variant {
            Some(variant) if variant.theme == theme => &variant.data_url,
            _ => &self.data_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    #[serde(rename = "type", default = "default_scene_type")]
    pub scene_type: String,
    #[serde(default = "default_scene_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub app_state: AppState,
    #[serde(default)]
    pub files: BTreeMap<AssetId, InlineAsset>,
}

fn default_scene_type() -> String {
    SCENE_TYPE.to_string()
}

fn default_scene_version() -> u32 {
    SCENE_VERSION
}

impl Default for Scene {
    fn default() -> Self {
        Scene {
            scene_type: default_scene_type(),
            version: SCENE_VERSION,
            source: None,
            elements: Vec::new(),
            app_state: AppState::default(),
            files: BTreeMap::new(),
        }
    }
}

impl Scene {
    pub fn element(&self, id: &ElementId) -> Option<&Element> {
        self.elements.iter().find(|e| &e.id == id)
    }

    pub fn element_mut(&mut self, id: &ElementId) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| &e.id == id)
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.elements.iter().any(|e| &e.id == id)
    }

    /// Live (not deleted) elements.
    pub fn live_elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|e| !e.is_deleted)
    }

    pub fn text_elements(&self) -> impl Iterator<Item = &Element> {
        self.live_elements().filter(|e| e.is_text())
    }

    /// Asset ids referenced by live image elements.
    pub fn referenced_assets(&self) -> Vec<AssetId> {
        let mut ids: Vec<AssetId> = self
            .live_elements()
            .filter_map(|e| e.image().and_then(|i| i.file_id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Replace an element by id with a new value. Returns false if no element had that id.
    pub fn replace_element(&mut self, element: Element) -> bool {
        match self.elements.iter_mut().find(|e| e.id == element.id) {
            Some(slot) => {
                *slot = element;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scene_parses_with_defaults() {
        let scene: Scene = serde_json::from_value(json!({
            "elements": [{"id": "abcdefgh", "type": "rectangle"}]
        }))
        .unwrap();
        assert_eq!(scene.scene_type, SCENE_TYPE);
        assert_eq!(scene.app_state.theme, Theme::Light);
        assert_eq!(scene.elements.len(), 1);
    }

    #[test]
    fn app_state_keeps_unknown_fields() {
        let scene: Scene = serde_json::from_value(json!({
            "appState": {"theme": "dark", "gridSize": 20}
        }))
        .unwrap();
        assert_eq!(scene.app_state.theme, Theme::Dark);
        let back = serde_json::to_value(&scene).unwrap();
        assert_eq!(back["appState"]["gridSize"], json!(20));
    }

    #[test]
    fn themed_variant_is_preferred_for_its_theme() {
        let asset = InlineAsset {
            mime_type: "image/svg+xml".to_string(),
            data_url: "data:light".to_string(),
            created_at: 0,
            natural_size: Size::new(1.0, 1.0),
            themed_variant: Some(ThemedVariant {
                theme: Theme::Dark,
                data_url: "data:dark".to_string(),
            }),
        };
        assert_eq!(asset.data_url_for(Theme::Light), "data:light");
        assert_eq!(asset.data_url_for(Theme::Dark), "data:dark");
    }
}
