//! Lines of the `## Embedded Files` section.
//!
//! ```text
//! 3f2a...: [[attachments/photo.png|400x300]]
//! 77b1...: [[diagram.svg]] {"#000000":"#ffffff"}
//! 9c0d...: https://example.com/logo.png
//! a41e...: file:///home/me/picture.jpg
//! e5f6...: $$e^{i\pi} + 1 = 0$$
//! 12ab...: diagram:"graph TD\nA-->B"
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use crate::ids::AssetId;

/// Colors to substitute in vector output, keyed by the color as it appears in the source.
pub type ColorMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetKind {
    Hyperlink,
    LocalFile,
    VaultFile,
}

/// Requested display size, written as `W` or `WxH` after a `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SizeHint {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl SizeHint {
    pub fn parse(text: &str) -> Option<SizeHint> {
        let (w, h) = match text.split_once('x') {
            Some((w, h)) => (w, Some(h)),
            None => (text, None),
        };
        let width = w.trim().parse().ok()?;
        let height = match h {
            Some(h) => Some(h.trim().parse().ok()?),
            None => None,
        };
        Some(SizeHint {
            width: Some(width),
            height,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none()
    }
}

impl Display for SizeHint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.width, self.height) {
            (Some(w), Some(h)) => write!(f, "{w}x{h}"),
            (Some(w), None) => write!(f, "{w}"),
            _ => Ok(()),
        }
    }
}

/// Pointer from an image element to content outside the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReference {
    pub id: AssetId,
    /// URL, or vault path with an optional `#subpart` (PDF page and crop, scene frame...).
    pub locator: String,
    pub kind: AssetKind,
    pub color_map: Option<ColorMap>,
    pub size_hint: SizeHint,
}

impl AssetReference {
    pub fn vault_file(id: AssetId, path: impl Into<String>) -> Self {
        AssetReference {
            id,
            locator: path.into(),
            kind: AssetKind::VaultFile,
            color_map: None,
            size_hint: SizeHint::default(),
        }
    }

    pub fn url(id: AssetId, url: impl Into<String>) -> Self {
        let url = url.into();
        let kind = if url.starts_with("file://") {
            AssetKind::LocalFile
        } else {
            AssetKind::Hyperlink
        };
        AssetReference {
            id,
            locator: url,
            kind,
            color_map: None,
            size_hint: SizeHint::default(),
        }
    }

    /// Locator without its `#subpart`.
    pub fn path(&self) -> &str {
        match self.kind {
            AssetKind::VaultFile => self.locator.split('#').next().unwrap_or(&self.locator),
            _ => &self.locator,
        }
    }

    /// The `#subpart` of a vault locator.
    pub fn subpart(&self) -> Option<&str> {
        match self.kind {
            AssetKind::VaultFile => self.locator.split_once('#').map(|(_, s)| s),
            _ => None,
        }
    }
}

/// A LaTeX formula rendered to an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquationRef {
    pub id: AssetId,
    pub source_text: String,
    pub is_loaded: bool,
}

impl EquationRef {
    pub fn new(source_text: impl Into<String>) -> Self {
        let source_text = source_text.into();
        EquationRef {
            id: AssetId::from_source_text(&source_text),
            source_text,
            is_loaded: false,
        }
    }
}

/// A diagram-as-code block rendered to an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramRef {
    pub id: AssetId,
    pub source_text: String,
    pub is_loaded: bool,
}

impl DiagramRef {
    pub fn new(source_text: impl Into<String>) -> Self {
        let source_text = source_text.into();
        DiagramRef {
            id: AssetId::from_source_text(&source_text),
            source_text,
            is_loaded: false,
        }
    }
}

/// One parsed `## Embedded Files` line.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddedEntry {
    Asset(AssetReference),
    Equation(EquationRef),
    Diagram(DiagramRef),
}

impl EmbeddedEntry {
    pub fn id(&self) -> &AssetId {
        match self {
            EmbeddedEntry::Asset(a) => &a.id,
            EmbeddedEntry::Equation(e) => &e.id,
            EmbeddedEntry::Diagram(d) => &d.id,
        }
    }
}

static ENTRY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([\w-]+):\s*(.+?)\s*$").expect("static"));

static VAULT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^!?\[\[([^\]|]+)(?:\|([^\]]*))?\]\]\s*(\{.*\})?$").expect("static")
});

const DIAGRAM_PREFIX: &str = "diagram:";

/// Parse one line. The id written in the line is kept even for formulas, so a document whose
/// ids predate the current hashing still binds to its image elements.
pub fn parse_embedded_line(line: &str) -> Option<EmbeddedEntry> {
    let caps = ENTRY_LINE.captures(line)?;
    let id = AssetId::from(caps.get(1)?.as_str());
    let rest = caps.get(2)?.as_str();

    if let Some(latex) = rest
        .strip_prefix("$$")
        .and_then(|r| r.strip_suffix("$$"))
    {
        return Some(EmbeddedEntry::Equation(EquationRef {
            id,
            source_text: latex.to_string(),
            is_loaded: false,
        }));
    }
    if let Some(encoded) = rest.strip_prefix(DIAGRAM_PREFIX) {
        let source_text: String = match serde_json::from_str(encoded) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!("[EmbeddedFiles] diagram source for {id} is not a JSON string: {e}");
                return None;
            }
        };
        return Some(EmbeddedEntry::Diagram(DiagramRef {
            id,
            source_text,
            is_loaded: false,
        }));
    }
    if let Some(link) = VAULT_LINK.captures(rest) {
        let color_map = match link.get(3) {
            Some(json) => match serde_json::from_str::<ColorMap>(json.as_str()) {
                Ok(map) => Some(map),
                Err(e) => {
                    tracing::warn!("[EmbeddedFiles] ignoring color map of {id}: {e}");
                    None
                }
            },
            None => None,
        };
        return Some(EmbeddedEntry::Asset(AssetReference {
            locator: link.get(1)?.as_str().trim().to_string(),
            kind: AssetKind::VaultFile,
            size_hint: link
                .get(2)
                .and_then(|s| SizeHint::parse(s.as_str()))
                .unwrap_or_default(),
            color_map,
            id,
        }));
    }
    if ["http://", "https://", "ftp://", "file://"]
        .iter()
        .any(|scheme| rest.starts_with(scheme))
    {
        return Some(EmbeddedEntry::Asset(AssetReference::url(id, rest)));
    }
    tracing::debug!("[EmbeddedFiles] unrecognized line: {line}");
    None
}

/// The line written for an entry.
pub fn embedded_line(entry: &EmbeddedEntry) -> String {
    match entry {
        EmbeddedEntry::Equation(eq) => format!("{}: $${}$$", eq.id, eq.source_text),
        EmbeddedEntry::Diagram(diagram) => format!(
            "{}: {DIAGRAM_PREFIX}{}",
            diagram.id,
            serde_json::Value::String(diagram.source_text.clone())
        ),
        EmbeddedEntry::Asset(asset) => match asset.kind {
            AssetKind::Hyperlink | AssetKind::LocalFile => {
                format!("{}: {}", asset.id, asset.locator)
            }
            AssetKind::VaultFile => {
                let mut line = format!("{}: [[{}", asset.id, asset.locator);
                if !asset.size_hint.is_empty() {
                    line.push_str(&format!("|{}", asset.size_hint));
                }
                line.push_str("]]");
                if let Some(map) = asset.color_map.as_ref().filter(|m| !m.is_empty()) {
                    if let Ok(json) = serde_json::to_string(map) {
                        line.push(' ');
                        line.push_str(&json);
                    }
                }
                line
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_file_with_size_and_colors() {
        let line = r##"abc123: [[art/logo.svg|120x80]] {"#000000": "#ffffff"}"##;
        let Some(EmbeddedEntry::Asset(asset)) = parse_embedded_line(line) else {
            panic!("expected an asset");
        };
        assert_eq!(asset.locator, "art/logo.svg");
        assert_eq!(asset.kind, AssetKind::VaultFile);
        assert_eq!(asset.size_hint, SizeHint { width: Some(120), height: Some(80) });
        assert_eq!(
            asset.color_map.as_ref().unwrap().get("#000000").map(String::as_str),
            Some("#ffffff")
        );
        assert_eq!(
            embedded_line(&EmbeddedEntry::Asset(asset)),
            r##"abc123: [[art/logo.svg|120x80]] {"#000000":"#ffffff"}"##
        );
    }

    #[test]
    fn pdf_subpart_stays_in_the_locator() {
        let Some(EmbeddedEntry::Asset(asset)) =
            parse_embedded_line("p1: [[book.pdf#page=3&rect=0,0,100,50]]")
        else {
            panic!("expected an asset");
        };
        assert_eq!(asset.path(), "book.pdf");
        assert_eq!(asset.subpart(), Some("page=3&rect=0,0,100,50"));
    }

    #[test]
    fn urls_by_scheme() {
        let Some(EmbeddedEntry::Asset(remote)) = parse_embedded_line("r1: https://a.b/c.png") else {
            panic!("expected an asset");
        };
        assert_eq!(remote.kind, AssetKind::Hyperlink);
        let Some(EmbeddedEntry::Asset(local)) = parse_embedded_line("l1: file:///tmp/x.png") else {
            panic!("expected an asset");
        };
        assert_eq!(local.kind, AssetKind::LocalFile);
        assert_eq!(embedded_line(&EmbeddedEntry::Asset(local)), "l1: file:///tmp/x.png");
    }

    #[test]
    fn formulas_and_diagrams() {
        let eq = parse_embedded_line("e1: $$e^{i\\pi}+1=0$$").unwrap();
        assert_eq!(
            eq,
            EmbeddedEntry::Equation(EquationRef {
                id: AssetId::from("e1"),
                source_text: "e^{i\\pi}+1=0".to_string(),
                is_loaded: false,
            })
        );
        let diagram = EmbeddedEntry::Diagram(DiagramRef {
            id: AssetId::from("d1"),
            source_text: "graph TD\nA-->B".to_string(),
            is_loaded: false,
        });
        let line = embedded_line(&diagram);
        assert_eq!(line, "d1: diagram:\"graph TD\\nA-->B\"");
        assert_eq!(parse_embedded_line(&line), Some(diagram));
    }

    #[test]
    fn junk_is_ignored() {
        assert_eq!(parse_embedded_line("not an entry"), None);
        assert_eq!(parse_embedded_line("x1: something else"), None);
        assert_eq!(SizeHint::parse("wide"), None);
        assert_eq!(SizeHint::parse("300"), Some(SizeHint { width: Some(300), height: None }));
    }
}
