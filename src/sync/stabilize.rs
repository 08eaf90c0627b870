//! Rewriting foreign element ids to stable ones.
//!
//! Text elements are written to the document as `text ^id` lines and linked elements as `id: link`
//! lines, so their ids have to fit [`STABLE_ID_LEN`]. Elements pasted in from elsewhere can carry
//! longer ids. Each such id is replaced by a fresh one and every reference to it is updated in the
//! same step: the element list is rebuilt and swapped in whole, so no observer ever sees a
//! container pointing at an id that no longer exists.

use std::collections::HashSet;

use crate::{
    event::{emit, EventSender, SyncEvent},
    ids::{ElementId, STABLE_ID_LEN},
    scene::{Element, ElementKind, Scene},
};

/// One id replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdRewrite {
    pub from: ElementId,
    pub to: ElementId,
}

/// Elements whose id ends up in document text.
fn needs_stable_id(element: &Element) -> bool {
    element.is_text() || element.link.is_some()
}

/// Replace every foreign id on text elements and linked elements. Idempotent.
pub fn stabilize_ids(scene: &mut Scene, events: Option<&EventSender>) -> Vec<IdRewrite> {
    let foreign: Vec<ElementId> = scene
        .elements
        .iter()
        .filter(|e| needs_stable_id(e) && !e.id.is_stable())
        .map(|e| e.id.clone())
        .collect();
    if foreign.is_empty() {
        return Vec::new();
    }

    let mut taken: HashSet<ElementId> = scene.elements.iter().map(|e| e.id.clone()).collect();
    let mut rewrites = Vec::with_capacity(foreign.len());
    for from in foreign {
        let to = ElementId::generate_unique(|candidate| taken.contains(candidate));
        taken.insert(to.clone());
        scene.elements = rewrite_id(&scene.elements, &from, &to);
        tracing::debug!(
            "[stabilize] element id {} is not a {}-character id, rewritten to {}",
            from,
            STABLE_ID_LEN,
            to
        );
        emit(events, SyncEvent::IdRewritten(from.clone(), to.clone()));
        rewrites.push(IdRewrite { from, to });
    }
    rewrites
}

/// A copy of `elements` with `from` replaced by `to` wherever it appears.
pub fn rewrite_id(elements: &[Element], from: &ElementId, to: &ElementId) -> Vec<Element> {
    let swap = |id: &mut ElementId| {
        if id == from {
            *id = to.clone();
        }
    };
    elements
        .iter()
        .cloned()
        .map(|mut element| {
            swap(&mut element.id);
            if let Some(frame) = element.frame_id.as_mut() {
                swap(frame);
            }
            for bound in element.bound_elements.iter_mut().flatten() {
                swap(&mut bound.id);
            }
            match &mut element.kind {
                ElementKind::Text(text) => {
                    if let Some(container) = text.container_id.as_mut() {
                        swap(container);
                    }
                }
                ElementKind::Arrow(linear) | ElementKind::Line(linear) => {
                    for binding in [&mut linear.start_binding, &mut linear.end_binding]
                        .into_iter()
                        .flatten()
                    {
                        swap(&mut binding.element_id);
                    }
                }
                _ => {}
            }
            element
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LONG_TEXT: &str = "aVeryLongForeignTextId";
    const LONG_RECT: &str = "aVeryLongForeignRectId";

    fn scene() -> Scene {
        serde_json::from_value(json!({"elements": [
            {"id": LONG_RECT, "type": "rectangle", "link": "[[Note]]",
             "boundElements": [{"id": LONG_TEXT, "type": "text"}, {"id": "arrow001", "type": "arrow"}]},
            {"id": LONG_TEXT, "type": "text", "containerId": LONG_RECT, "text": "hi"},
            {"id": "arrow001", "type": "arrow", "startBinding": {"elementId": LONG_RECT, "gap": 1}},
            {"id": "plainLongShapeWithoutLink", "type": "ellipse"}
        ]}))
        .unwrap()
    }

    #[test]
    fn rewrites_are_applied_to_every_reference() {
        let mut s = scene();
        let rewrites = stabilize_ids(&mut s, None);
        assert_eq!(rewrites.len(), 2);
        let rect = &rewrites.iter().find(|r| r.from.as_str() == LONG_RECT).unwrap().to;
        let text = &rewrites.iter().find(|r| r.from.as_str() == LONG_TEXT).unwrap().to;
        assert!(rect.is_stable() && text.is_stable());

        assert_eq!(&s.elements[0].id, rect);
        assert_eq!(s.elements[0].bound_ids().next(), Some(text));
        assert_eq!(&s.elements[1].id, text);
        assert_eq!(s.elements[1].text().unwrap().container_id.as_ref(), Some(rect));
        assert_eq!(
            s.elements[2].linear().unwrap().start_binding.as_ref().unwrap().element_id,
            *rect
        );
        // Unlinked shapes keep whatever id they came with.
        assert_eq!(s.elements[3].id.as_str(), "plainLongShapeWithoutLink");
    }

    #[test]
    fn stabilizing_twice_changes_nothing() {
        let mut s = scene();
        stabilize_ids(&mut s, None);
        let once = s.clone();
        assert!(stabilize_ids(&mut s, None).is_empty());
        assert_eq!(s, once);
    }

    #[test]
    fn rewrites_are_reported_on_the_channel() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut s = scene();
        stabilize_ids(&mut s, Some(&tx));
        let mut seen = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, SyncEvent::IdRewritten(_, _)));
            seen += 1;
        }
        assert_eq!(seen, 2);
    }
}
