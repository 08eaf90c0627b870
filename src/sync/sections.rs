//! Locating the parts of a scene document.
//!
//! A document looks like this:
//!
//! ````text
//! ---
//! excalidraw-plugin: parsed
//! ---
//! Free text the user writes around the drawing.
//! %%
//! # Excalidraw Data
//!
//! ## Text Elements
//! Hello [[Other Note]] ^abcdefgh
//!
//! ## Element Links
//! rect0001: [[Some Note]]
//!
//! ## Embedded Files
//! 3f2a...: [[image.png]]
//!
//! ## Drawing
//! ```json
//! {"type": "excalidraw", ...}
//! ```
//! %%
//! ````
//!
//! The text is user-editable, so every lookup is an ordered chain of [`Attempt`]s. Each attempt
//! is tried in priority order and reports an explicit match or `None`; the first match wins. When
//! every attempt fails the caller falls back to treating the remainder as plain free text.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::error::SceneDocError;

pub const DATA_HEADER: &str = "# Excalidraw Data";
pub const TEXT_ELEMENTS_HEADER: &str = "## Text Elements";
pub const ELEMENT_LINKS_HEADER: &str = "## Element Links";
pub const EMBEDDED_FILES_HEADER: &str = "## Embedded Files";
pub const DRAWING_HEADER: &str = "## Drawing";
pub const COMMENT_FENCE: &str = "%%";
/// Front matter key marking a file as a scene document.
pub const DOCUMENT_TYPE_KEY: &str = "excalidraw-plugin";

/// A named pattern with the capture group that marks where its section begins.
pub struct Attempt {
    pub name: &'static str,
    regex: Regex,
    start_group: usize,
}

impl Attempt {
    fn new(name: &'static str, pattern: &str, start_group: usize) -> Self {
        Attempt {
            name,
            regex: Regex::new(pattern).expect("static section pattern"),
            start_group,
        }
    }
}

/// Where the data section starts and where its text element list begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSectionMatch {
    pub attempt: &'static str,
    /// End of the free text.
    pub boundary: usize,
    /// First byte after the text elements header.
    pub body_start: usize,
}

impl Attempt {
    pub fn match_data_section(&self, text: &str) -> Option<DataSectionMatch> {
        let caps = self.regex.captures(text)?;
        Some(DataSectionMatch {
            attempt: self.name,
            boundary: caps.get(self.start_group)?.start(),
            body_start: caps.get(0)?.end(),
        })
    }
}

static DATA_SECTION_CHAIN: Lazy<Vec<Attempt>> = Lazy::new(|| {
    vec![
        // `#` heading that hides the data in reading view, then the comment fence.
        Attempt::new(
            "hidden-heading",
            r"(?m)^#\n+(%%\n+# Excalidraw Data\n+## Text Elements(?:\n|$))",
            1,
        ),
        // Same, but the blank line before the `#` was deleted so it trails other text.
        Attempt::new(
            "hidden-heading-joined",
            r"#\n+(%%\n+# Excalidraw Data\n+## Text Elements(?:\n|$))",
            1,
        ),
        Attempt::new(
            "data-section",
            r"(?m)^((?:%%\n+)?# Excalidraw Data\n+## Text Elements(?:\n|$))",
            1,
        ),
        // Marker glued to the end of a line of free text.
        Attempt::new(
            "unanchored-data-section",
            r"((?:%%\n+)?# Excalidraw Data\n+## Text Elements(?:\n|$))",
            1,
        ),
        // Older documents without the `# Excalidraw Data` wrapper.
        Attempt::new(
            "legacy-text-elements",
            r"(?m)^((?:%%\n+)?##? Text Elements(?:\n|$))",
            1,
        ),
    ]
});

/// Names of the data section attempts in priority order.
pub fn data_section_attempts() -> Vec<&'static str> {
    DATA_SECTION_CHAIN.iter().map(|a| a.name).collect()
}

pub fn find_data_section(text: &str) -> Option<DataSectionMatch> {
    DATA_SECTION_CHAIN
        .iter()
        .find_map(|attempt| attempt.match_data_section(text))
}

/// The serialized scene as found in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawingMatch {
    pub attempt: &'static str,
    /// Start of the `## Drawing` header (or the comment fence before it).
    pub start: usize,
    pub compressed: bool,
    pub payload: String,
}

static DRAWING_CHAIN: Lazy<Vec<(Attempt, bool)>> = Lazy::new(|| {
    vec![
        (
            Attempt::new(
                "fenced-json",
                r"(\n##? Drawing\n)[^`]*```json\n([\s\S]*?)```\n",
                1,
            ),
            false,
        ),
        (
            Attempt::new(
                "fenced-compressed-json",
                r"(\n##? Drawing\n)[^`]*```compressed-json\n([\s\S]*?)```\n",
                1,
            ),
            true,
        ),
        // Closing fence lost, typically after a conflicting merge of two edits.
        (
            Attempt::new(
                "open-compressed-json",
                r"(?s)(\n##? Drawing\n)```compressed-json\n(.*?)(?:```\s*)?(?:%%\s*)?\z",
                1,
            ),
            true,
        ),
        (
            Attempt::new(
                "open-json",
                r"(?s)(\n##? Drawing\n)(?:```json\n)?(.*?)(?:```\s*)?(?:%%\s*)?\z",
                1,
            ),
            false,
        ),
    ]
});

pub fn find_drawing(text: &str) -> Option<DrawingMatch> {
    DRAWING_CHAIN.iter().find_map(|(attempt, compressed)| {
        let caps = attempt.regex.captures(text)?;
        let payload = caps.get(2)?.as_str().trim();
        if payload.is_empty() {
            return None;
        }
        let mut start = caps.get(attempt.start_group)?.start();
        // Pull a directly preceding comment fence into the drawing section.
        if text[..start].ends_with(COMMENT_FENCE) {
            start -= COMMENT_FENCE.len();
        } else if text[..start].ends_with("%%\n") {
            start -= COMMENT_FENCE.len() + 1;
        }
        Some(DrawingMatch {
            attempt: attempt.name,
            start,
            compressed: *compressed,
            payload: payload.to_string(),
        })
    })
}

/// Split a leading `---` front matter block from the rest, both returned verbatim.
pub fn split_front_matter(text: &str) -> (&str, &str) {
    if let Some(rest) = text.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---\n") {
            let split = 4 + end + 5;
            return (&text[..split], &text[split..]);
        }
    }
    ("", text)
}

/// Read-only key/value view of the front matter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMetadata {
    pub raw: String,
    pub values: BTreeMap<String, serde_yaml::Value>,
}

impl DocumentMetadata {
    pub fn parse(raw: &str) -> Self {
        let body = raw
            .strip_prefix("---\n")
            .and_then(|r| r.strip_suffix("---\n"))
            .unwrap_or("");
        let values = match serde_yaml::from_str::<BTreeMap<String, serde_yaml::Value>>(body) {
            Ok(values) => values,
            Err(e) => {
                if !body.trim().is_empty() {
                    tracing::warn!("[DocumentMetadata] front matter is not valid YAML: {e}");
                }
                BTreeMap::new()
            }
        };
        DocumentMetadata {
            raw: raw.to_string(),
            values,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    /// Whether the front matter marks this as a scene document.
    pub fn is_scene_document(&self) -> bool {
        self.values.contains_key(DOCUMENT_TYPE_KEY)
    }
}

/// Whether `text` looks like a scene document, by front matter flag or drawing section.
pub fn is_scene_document(text: &str) -> bool {
    let (front_matter, _) = split_front_matter(text);
    DocumentMetadata::parse(front_matter).is_scene_document() || find_drawing(text).is_some()
}

/// Bounds of the named `## ` subsections inside a data section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataRegions<'a> {
    pub text_elements: &'a str,
    pub element_links: Option<&'a str>,
    pub embedded_files: Option<&'a str>,
}

/// Split the data section body (text elements header already consumed) at the known headers.
pub fn split_data_regions(body: &str) -> DataRegions<'_> {
    let header_pos = |header: &str| -> Option<usize> {
        let needle = format!("\n{header}\n");
        if body.starts_with(&needle[1..]) {
            Some(0)
        } else {
            body.find(&needle).map(|p| p + 1)
        }
    };
    let links = header_pos(ELEMENT_LINKS_HEADER);
    let files = header_pos(EMBEDDED_FILES_HEADER);
    let text_end = [links, files]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(body.len());
    let region = |start: Option<usize>, header: &str| -> Option<&str> {
        let start = start? + header.len() + 1;
        let end = [links, files]
            .into_iter()
            .flatten()
            .filter(|p| *p >= start)
            .min()
            .unwrap_or(body.len());
        Some(&body[start..end])
    };
    DataRegions {
        text_elements: &body[..text_end],
        element_links: region(links, ELEMENT_LINKS_HEADER),
        embedded_files: region(files, EMBEDDED_FILES_HEADER),
    }
}

// Any id shape is accepted here; foreign ids are rewritten after binding.
static BLOCK_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s\^([\w-]+)(?:\n+|$)").expect("static"));

/// `(id, raw text)` pairs of the text elements list, in document order.
pub fn parse_text_elements(region: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut position = 0;
    for caps in BLOCK_REF.captures_iter(region) {
        let (Some(whole), Some(id)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let raw = &region[position..whole.start()];
        out.push((id.as_str().to_string(), raw.to_string()));
        position = whole.end();
    }
    out
}

static ELEMENT_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([\w-]+):\s*(.+?)\s*$").expect("static"));

pub fn parse_element_links(region: &str) -> Vec<(String, String)> {
    ELEMENT_LINK
        .captures_iter(region)
        .filter_map(|caps| Some((caps.get(1)?.as_str().to_string(), caps.get(2)?.as_str().to_string())))
        .collect()
}

/// Deflate and base64 the scene JSON, wrapped into `line_width` chunks separated by blank lines.
pub fn compress_payload(json: &str, line_width: usize) -> Result<String, SceneDocError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(json.as_bytes())?;
    let encoded = BASE64.encode(encoder.finish()?);
    let width = line_width.max(1);
    let chunks: Vec<&str> = encoded
        .as_bytes()
        .chunks(width)
        .map(|c| std::str::from_utf8(c).unwrap_or_default())
        .collect();
    Ok(chunks.join("\n\n"))
}

pub fn decompress_payload(payload: &str) -> Result<String, SceneDocError> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64.decode(compact.as_bytes())?;
    let mut decoder = DeflateDecoder::new(&bytes[..]);
    let mut json = String::new();
    decoder.read_to_string(&mut json)?;
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRAWING: &str = "%%\n## Drawing\n```json\n{\"elements\":[]}\n```\n%%";

    fn data_section() -> String {
        format!("%%\n{DATA_HEADER}\n\n{TEXT_ELEMENTS_HEADER}\nHello ^abcdefgh\n\n{DRAWING}")
    }

    #[test]
    fn normal_document_uses_data_section_attempt() {
        let doc = format!("free text\n{}", data_section());
        let found = find_data_section(&doc).unwrap();
        assert_eq!(found.attempt, "data-section");
        assert_eq!(&doc[..found.boundary], "free text\n");
    }

    #[test]
    fn hidden_heading_stays_in_free_text() {
        let doc = format!("free text\n#\n{}", data_section());
        let found = find_data_section(&doc).unwrap();
        assert_eq!(found.attempt, "hidden-heading");
        assert_eq!(&doc[..found.boundary], "free text\n#\n");
    }

    #[test]
    fn joined_hidden_heading_is_recovered() {
        let doc = format!("free text#\n{}", data_section());
        let found = find_data_section(&doc).unwrap();
        assert_eq!(found.attempt, "hidden-heading-joined");
        assert_eq!(&doc[..found.boundary], "free text#\n");
    }

    #[test]
    fn legacy_text_elements_header() {
        let doc = format!("intro\n# Text Elements\nHi ^abcdefgh\n\n{DRAWING}");
        let found = find_data_section(&doc).unwrap();
        assert_eq!(found.attempt, "legacy-text-elements");
        assert_eq!(&doc[..found.boundary], "intro\n");
    }

    #[test]
    fn marker_without_boundary_is_found() {
        let doc = format!("free text# Excalidraw Data\n## Text Elements\nHi ^abcdefgh\n\n{DRAWING}");
        let found = find_data_section(&doc).unwrap();
        assert_eq!(found.attempt, "unanchored-data-section");
        assert_eq!(&doc[..found.boundary], "free text");
    }

    #[test]
    fn no_data_section() {
        assert!(find_data_section("just text\n").is_none());
    }

    #[test]
    fn drawing_chain_priorities() {
        let fenced = find_drawing(&data_section()).unwrap();
        assert_eq!(fenced.attempt, "fenced-json");
        assert_eq!(fenced.payload, "{\"elements\":[]}");
        assert!(!fenced.compressed);

        let open = find_drawing("x\n## Drawing\n```json\n{\"elements\":[]}\n").unwrap();
        assert_eq!(open.attempt, "open-json");
        assert_eq!(open.payload, "{\"elements\":[]}");

        let compressed_json = compress_payload("{\"elements\":[]}", 8).unwrap();
        let doc = format!("x\n## Drawing\n```compressed-json\n{compressed_json}\n```\n%%");
        let found = find_drawing(&doc).unwrap();
        assert_eq!(found.attempt, "fenced-compressed-json");
        assert_eq!(decompress_payload(&found.payload).unwrap(), "{\"elements\":[]}");

        let open_doc = format!("x\n## Drawing\n```compressed-json\n{compressed_json}");
        let found = find_drawing(&open_doc).unwrap();
        assert_eq!(found.attempt, "open-compressed-json");
        assert!(found.compressed);
    }

    #[test]
    fn drawing_start_includes_comment_fence() {
        let doc = data_section();
        let found = find_drawing(&doc).unwrap();
        assert!(doc[found.start..].starts_with("%%\n## Drawing"));
    }

    #[test]
    fn compression_survives_rewrapping() {
        let json = "{\"elements\":[{\"id\":\"abcdefgh\"}]}".repeat(20);
        let packed = compress_payload(&json, 16).unwrap();
        assert!(packed.contains("\n\n"));
        assert_eq!(decompress_payload(&packed).unwrap(), json);
        let rewrapped = packed.replace("\n\n", "\n");
        assert_eq!(decompress_payload(&rewrapped).unwrap(), json);
    }

    #[test]
    fn text_elements_keep_multiline_raw_text() {
        let region = "Hello [[Other]] ^abcdefgh\n\nline one\nline two ^ijklmnop\n\nx ^foreignId_12345";
        let parsed = parse_text_elements(region);
        assert_eq!(
            parsed,
            vec![
                ("abcdefgh".to_string(), "Hello [[Other]]".to_string()),
                ("ijklmnop".to_string(), "line one\nline two".to_string()),
                ("foreignId_12345".to_string(), "x".to_string()),
            ]
        );
    }

    #[test]
    fn regions_split_at_headers() {
        let body = "a ^abcdefgh\n\n## Element Links\nrect0001: [[x]]\n\n## Embedded Files\nf: [[img.png]]\n\n";
        let regions = split_data_regions(body);
        assert_eq!(regions.text_elements, "a ^abcdefgh\n\n");
        assert_eq!(regions.element_links, Some("rect0001: [[x]]\n\n"));
        assert_eq!(regions.embedded_files, Some("f: [[img.png]]\n\n"));
        assert_eq!(
            parse_element_links(regions.element_links.unwrap()),
            vec![("rect0001".to_string(), "[[x]]".to_string())]
        );
    }

    #[test]
    fn front_matter_split_and_flag() {
        let doc = "---\nexcalidraw-plugin: parsed\ntags: [a]\n---\nbody";
        let (fm, rest) = split_front_matter(doc);
        assert_eq!(fm, "---\nexcalidraw-plugin: parsed\ntags: [a]\n---\n");
        assert_eq!(rest, "body");
        let meta = DocumentMetadata::parse(fm);
        assert!(meta.is_scene_document());
        assert_eq!(meta.get_str(DOCUMENT_TYPE_KEY), Some("parsed"));
    }
}
