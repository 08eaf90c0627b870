//! Repairs applied to every loaded scene before anything else reads it.
//!
//! Two passes. [`normalize_raw_scene`] runs on the untyped JSON and fills in fields that older
//! documents either lack or spell differently. [`repair_references`] runs on the typed scene and
//! drops cross-references that point nowhere, so every later stage can assume referential
//! integrity.

use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};

use crate::{
    ids::ElementId,
    scene::{element::DEFAULT_LINE_HEIGHT, BoundElement, ElementKind, Scene},
};

const GEOMETRY_FIELDS: [&str; 5] = ["x", "y", "width", "height", "angle"];

/// Upgrade legacy element fields in place. Returns the number of fields changed.
pub fn normalize_raw_scene(scene: &mut Value) -> usize {
    let Some(elements) = scene.get_mut("elements").and_then(|e| e.as_array_mut()) else {
        return 0;
    };
    elements
        .iter_mut()
        .filter_map(|e| e.as_object_mut())
        .map(normalize_raw_element)
        .sum()
}

fn normalize_raw_element(element: &mut Map<String, Value>) -> usize {
    let mut changed = 0;
    for field in GEOMETRY_FIELDS {
        if !element.get(field).map(Value::is_number).unwrap_or(false) {
            element.insert(field.to_string(), json!(0));
            changed += 1;
        }
    }

    let type_name = element
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();

    if let Some(sharpness) = element.remove("strokeSharpness") {
        if !element.get("roundness").map(|r| !r.is_null()).unwrap_or(false) {
            let roundness = match sharpness.as_str() {
                Some("round") if matches!(type_name.as_str(), "arrow" | "line") => json!({"type": 2}),
                Some("round") => json!({"type": 3}),
                _ => Value::Null,
            };
            element.insert("roundness".to_string(), roundness);
        }
        changed += 1;
    }

    if let Some(ids) = element.remove("boundElementIds") {
        if !element.contains_key("boundElements") {
            let bound: Vec<Value> = ids
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|id| id.as_str())
                .map(|id| json!({"id": id, "type": "arrow"}))
                .collect();
            element.insert("boundElements".to_string(), Value::Array(bound));
        }
        changed += 1;
    }

    if type_name == "text" {
        if !element.contains_key("autoResize") {
            element.insert("autoResize".to_string(), Value::Bool(true));
            changed += 1;
        }
        if !element.get("lineHeight").map(Value::is_number).unwrap_or(false) {
            element.insert("lineHeight".to_string(), json!(DEFAULT_LINE_HEIGHT));
            changed += 1;
        }
    }
    changed
}

/// What [`repair_references`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub dangling_removed: usize,
    pub texts_detached: usize,
    pub back_references_added: usize,
}

impl RepairReport {
    pub fn is_empty(&self) -> bool {
        self == &RepairReport::default()
    }
}

/// Remove references to missing elements and settle which text a container displays.
///
/// A container shows at most one text. Its `boundElements` order decides: the first text entry
/// whose element points back at the container keeps the binding, every other text claiming the
/// container is detached and becomes free text.
pub fn repair_references(scene: &mut Scene) -> RepairReport {
    let mut report = RepairReport::default();
    let ids: HashSet<ElementId> = scene.elements.iter().map(|e| e.id.clone()).collect();
    let frames: HashSet<ElementId> = scene
        .elements
        .iter()
        .filter(|e| matches!(e.kind, ElementKind::Frame(_)))
        .map(|e| e.id.clone())
        .collect();

    for element in scene.elements.iter_mut() {
        if let Some(bound) = element.bound_elements.as_mut() {
            let before = bound.len();
            bound.retain(|b| ids.contains(&b.id));
            report.dangling_removed += before - bound.len();
        }
        if element.frame_id.as_ref().is_some_and(|f| !frames.contains(f)) {
            element.frame_id = None;
            report.dangling_removed += 1;
        }
        match &mut element.kind {
            ElementKind::Text(text) => {
                if text.container_id.as_ref().is_some_and(|c| !ids.contains(c)) {
                    text.container_id = None;
                    report.dangling_removed += 1;
                }
            }
            ElementKind::Arrow(linear) | ElementKind::Line(linear) => {
                for binding in [&mut linear.start_binding, &mut linear.end_binding] {
                    if binding.as_ref().is_some_and(|b| !ids.contains(&b.element_id)) {
                        *binding = None;
                        report.dangling_removed += 1;
                    }
                }
            }
            _ => {}
        }
    }

    settle_container_texts(scene, &mut report);
    report
}

fn settle_container_texts(scene: &mut Scene, report: &mut RepairReport) {
    // Which container each text claims.
    let claims: HashMap<ElementId, ElementId> = scene
        .elements
        .iter()
        .filter_map(|e| {
            let container = e.text()?.container_id.clone()?;
            Some((e.id.clone(), container))
        })
        .collect();

    let mut keeper: HashMap<ElementId, ElementId> = HashMap::new();
    for element in scene.elements.iter_mut() {
        let Some(bound) = element.bound_elements.as_mut() else {
            continue;
        };
        let container = element.id.clone();
        let mut seen_text = false;
        bound.retain(|b| {
            if b.kind != "text" {
                return true;
            }
            let points_back = claims.get(&b.id) == Some(&container);
            if points_back && !seen_text {
                seen_text = true;
                keeper.insert(container.clone(), b.id.clone());
                return true;
            }
            report.dangling_removed += 1;
            false
        });
    }

    // Texts claiming a container that shows something else are detached. A container without a
    // listed text adopts the first text (in scene order) that claims it.
    let mut adopted: Vec<(ElementId, ElementId)> = Vec::new();
    for element in scene.elements.iter_mut() {
        let id = element.id.clone();
        let Some(text) = element.text_mut() else {
            continue;
        };
        let Some(container) = text.container_id.clone() else {
            continue;
        };
        match keeper.get(&container) {
            Some(kept) if kept == &id => {}
            Some(_) => {
                text.container_id = None;
                report.texts_detached += 1;
            }
            None => {
                keeper.insert(container.clone(), id.clone());
                adopted.push((container, id));
            }
        }
    }
    for (container, text) in adopted {
        if let Some(element) = scene.element_mut(&container) {
            element
                .bound_elements
                .get_or_insert_with(Vec::new)
                .push(BoundElement {
                    id: text,
                    kind: "text".to_string(),
                });
            report.back_references_added += 1;
        }
    }
}
