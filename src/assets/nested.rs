//! Selecting the part of an embedded scene a reference asks for.
//!
//! `drawing.md#^group=ID`, `#^frame=ID` and `#^area=ID` pick a group, a frame with its contents,
//! or everything inside one element's bounds. `#^ID` picks a single element with its bound
//! elements. Anything else renders the whole scene.

use std::collections::HashSet;

use crate::{
    ids::ElementId,
    scene::{Element, ElementKind, Scene},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneSubset {
    All,
    Group(String),
    Frame(ElementId),
    Area(ElementId),
    Element(ElementId),
}

impl SceneSubset {
    pub fn parse(subpart: Option<&str>) -> SceneSubset {
        let Some(block) = subpart.and_then(|s| s.strip_prefix('^')) else {
            return SceneSubset::All;
        };
        match block.split_once('=') {
            Some(("group", id)) => SceneSubset::Group(id.to_string()),
            Some(("frame", id)) => SceneSubset::Frame(ElementId::from(id)),
            Some(("area", id)) => SceneSubset::Area(ElementId::from(id)),
            Some(_) => SceneSubset::All,
            None => SceneSubset::Element(ElementId::from(block)),
        }
    }
}

fn bounds(element: &Element) -> (f64, f64, f64, f64) {
    (
        element.x,
        element.y,
        element.x + element.width,
        element.y + element.height,
    )
}

/// A copy of `scene` holding only the selected live elements.
pub fn select_subset(scene: &Scene, subset: &SceneSubset) -> Scene {
    let live = scene.live_elements();
    let keep: Vec<Element> = match subset {
        SceneSubset::All => live.cloned().collect(),
        SceneSubset::Group(group) => live.filter(|e| e.group_ids.contains(group)).cloned().collect(),
        SceneSubset::Frame(frame) => live
            .filter(|e| &e.id == frame || e.frame_id.as_ref() == Some(frame))
            .cloned()
            .collect(),
        SceneSubset::Area(id) => match scene.element(id) {
            Some(area) => {
                let (x1, y1, x2, y2) = bounds(area);
                live.filter(|e| {
                    let (ex1, ey1, ex2, ey2) = bounds(e);
                    ex1 >= x1 && ey1 >= y1 && ex2 <= x2 && ey2 <= y2
                })
                .cloned()
                .collect()
            }
            None => Vec::new(),
        },
        SceneSubset::Element(id) => match scene.element(id) {
            Some(element) => {
                let mut ids: HashSet<&ElementId> = element.bound_ids().collect();
                ids.insert(id);
                if let ElementKind::Text(text) = &element.kind {
                    ids.extend(text.container_id.iter());
                }
                live.filter(|e| ids.contains(&e.id)).cloned().collect()
            }
            None => Vec::new(),
        },
    };
    let referenced: HashSet<_> = keep
        .iter()
        .filter_map(|e| e.image().and_then(|i| i.file_id.clone()))
        .collect();
    Scene {
        elements: keep,
        files: scene
            .files
            .iter()
            .filter(|(id, _)| referenced.contains(*id))
            .map(|(id, asset)| (id.clone(), asset.clone()))
            .collect(),
        ..scene.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scene() -> Scene {
        serde_json::from_value(json!({"elements": [
            {"id": "frame001", "type": "frame", "x": 0, "y": 0, "width": 100, "height": 100},
            {"id": "rect0001", "type": "rectangle", "x": 10, "y": 10, "width": 20, "height": 20,
             "frameId": "frame001", "groupIds": ["g1"], "boundElements": [{"id": "text0001", "type": "text"}]},
            {"id": "text0001", "type": "text", "containerId": "rect0001", "x": 12, "y": 12, "width": 5, "height": 5},
            {"id": "far00001", "type": "ellipse", "x": 500, "y": 500, "width": 10, "height": 10, "groupIds": ["g1"]},
            {"id": "gone0001", "type": "ellipse", "isDeleted": true, "groupIds": ["g1"]}
        ]}))
        .unwrap()
    }

    fn ids(scene: &Scene) -> Vec<&str> {
        scene.elements.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn subpart_parsing() {
        assert_eq!(SceneSubset::parse(None), SceneSubset::All);
        assert_eq!(SceneSubset::parse(Some("Heading")), SceneSubset::All);
        assert_eq!(
            SceneSubset::parse(Some("^group=g1")),
            SceneSubset::Group("g1".to_string())
        );
        assert_eq!(
            SceneSubset::parse(Some("^rect0001")),
            SceneSubset::Element(ElementId::from("rect0001"))
        );
    }

    #[test]
    fn subsets_select_live_elements() {
        let s = scene();
        assert_eq!(ids(&select_subset(&s, &SceneSubset::All)).len(), 4);
        assert_eq!(
            ids(&select_subset(&s, &SceneSubset::Group("g1".to_string()))),
            vec!["rect0001", "far00001"]
        );
        assert_eq!(
            ids(&select_subset(&s, &SceneSubset::Frame(ElementId::from("frame001")))),
            vec!["frame001", "rect0001"]
        );
        assert_eq!(
            ids(&select_subset(&s, &SceneSubset::Area(ElementId::from("frame001")))),
            vec!["frame001", "rect0001", "text0001"]
        );
        assert_eq!(
            ids(&select_subset(&s, &SceneSubset::Element(ElementId::from("rect0001")))),
            vec!["rect0001", "text0001"]
        );
        assert!(select_subset(&s, &SceneSubset::Element(ElementId::from("nope"))).elements.is_empty());
    }
}
