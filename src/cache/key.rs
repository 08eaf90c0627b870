//! Render cache keys.
//!
//! A key is a readable string, one `|`-separated field per input that changes the rendered
//! bytes, prefixed with the schema version:
//!
//! ```text
//! v2|drawings/plan.md|frame=f1a2b3c4|dark|vector-image|s1.5|t1|f1|c3e1f0a9b2c4d5e6|w640
//! ```
//!
//! `c` carries a digest of the reference's color map and `w` a width override, `-` when absent.
//!
//! Bumping [`CACHE_KEY_VERSION`] makes every older entry recognisable by its prefix so
//! maintenance can purge it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};

use crate::{
    assets::reference::ColorMap, error::SceneDocError, host::SceneRenderOptions, scene::Theme,
};

pub const CACHE_KEY_VERSION: u32 = 2;

/// Hex characters kept from a color map digest.
const COLOR_DIGEST_LEN: usize = 16;

const SEPARATOR: char = '|';

/// The part of a source a render shows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subpart {
    Whole,
    Block(String),
    Section(String),
    Group(String),
    Frame(String),
    Area(String),
    /// PDF page selector, `page=N` with an optional crop.
    Page(String),
}

impl Subpart {
    /// Classify the text after `#` in a locator.
    pub fn parse(subpart: Option<&str>) -> Subpart {
        let Some(subpart) = subpart.map(str::trim).filter(|s| !s.is_empty()) else {
            return Subpart::Whole;
        };
        if subpart.starts_with("page=") {
            return Subpart::Page(subpart.to_string());
        }
        match subpart.strip_prefix('^') {
            Some(block) => match block.split_once('=') {
                Some(("group", id)) => Subpart::Group(id.to_string()),
                Some(("frame", id)) => Subpart::Frame(id.to_string()),
                Some(("area", id)) => Subpart::Area(id.to_string()),
                _ => Subpart::Block(block.to_string()),
            },
            None => Subpart::Section(subpart.to_string()),
        }
    }
}

impl Display for Subpart {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Subpart::Whole => Ok(()),
            Subpart::Block(id) => write!(f, "block={id}"),
            Subpart::Section(heading) => write!(f, "section={heading}"),
            Subpart::Group(id) => write!(f, "group={id}"),
            Subpart::Frame(id) => write!(f, "frame={id}"),
            Subpart::Area(id) => write!(f, "area={id}"),
            Subpart::Page(page) => write!(f, "{page}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    Raster,
    VectorImage,
    VectorNative,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Raster => "raster",
            OutputKind::VectorImage => "vector-image",
            OutputKind::VectorNative => "vector-native",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputKind::Raster => "image/png",
            OutputKind::VectorImage | OutputKind::VectorNative => "image/svg+xml",
        }
    }

    pub fn is_vector(&self) -> bool {
        !matches!(self, OutputKind::Raster)
    }
}

impl TryFrom<&str> for OutputKind {
    type Error = SceneDocError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "raster" => Ok(OutputKind::Raster),
            "vector-image" => Ok(OutputKind::VectorImage),
            "vector-native" => Ok(OutputKind::VectorNative),
            other => Err(SceneDocError::Cache(format!("unknown output kind {other:?}"))),
        }
    }
}

/// Everything that changes the bytes of a render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheKey {
    pub locator: String,
    pub subpart: Subpart,
    pub theme: Theme,
    pub output: OutputKind,
    pub scale: f64,
    pub transparent: bool,
    pub inline_fonts: bool,
    /// Digest of the color substitutions applied to the output.
    pub color_map: Option<String>,
    /// Width the output was laid out for, when the reference overrides the default.
    pub width: Option<u32>,
}

/// Short stable digest of a color map. Empty maps change nothing and digest to `None`.
pub fn color_map_digest(map: Option<&ColorMap>) -> Option<String> {
    let map = map.filter(|m| !m.is_empty())?;
    let mut hasher = Sha256::new();
    for (from, to) in map {
        hasher.update(from.as_bytes());
        hasher.update([0u8]);
        hasher.update(to.as_bytes());
        hasher.update([0u8]);
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(COLOR_DIGEST_LEN);
    Some(digest)
}

impl CacheKey {
    pub fn new(
        locator: impl Into<String>,
        subpart: Option<&str>,
        output: OutputKind,
        options: &SceneRenderOptions,
    ) -> Self {
        CacheKey {
            locator: locator.into(),
            subpart: Subpart::parse(subpart),
            theme: options.theme,
            output,
            scale: options.scale,
            transparent: options.transparent,
            inline_fonts: options.inline_fonts,
            color_map: None,
            width: None,
        }
    }

    pub fn with_color_map(mut self, map: Option<&ColorMap>) -> Self {
        self.color_map = color_map_digest(map);
        self
    }

    pub fn with_width(mut self, width: Option<u32>) -> Self {
        self.width = width;
        self
    }

    /// The storage form of this key.
    pub fn encode(&self) -> String {
        format!(
            "v{CACHE_KEY_VERSION}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}s{}{SEPARATOR}t{}{SEPARATOR}f{}{SEPARATOR}c{}{SEPARATOR}w{}",
            escape(&self.locator),
            escape(&self.subpart.to_string()),
            self.theme,
            self.output.as_str(),
            self.scale,
            u8::from(self.transparent),
            u8::from(self.inline_fonts),
            self.color_map.as_deref().unwrap_or("-"),
            self.width.map_or_else(|| "-".to_string(), |w| w.to_string()),
        )
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

fn escape(field: &str) -> String {
    field.replace('%', "%25").replace(SEPARATOR, "%7C")
}

/// Schema version of a stored key, `None` if the key has no recognisable version prefix.
pub fn key_version(key: &str) -> Option<u32> {
    key.strip_prefix('v')?
        .split(SEPARATOR)
        .next()?
        .parse()
        .ok()
}

pub fn is_current(key: &str) -> bool {
    key_version(key) == Some(CACHE_KEY_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CacheKey {
        CacheKey::new(
            "drawings/plan.md",
            Some("^frame=f1a2b3c4"),
            OutputKind::VectorImage,
            &SceneRenderOptions::default(),
        )
    }

    #[test]
    fn encoding_is_readable_and_versioned() {
        assert_eq!(
            key().encode(),
            "v2|drawings/plan.md|frame=f1a2b3c4|light|vector-image|s1|t1|f1|c-|w-"
        );
        assert!(is_current(&key().encode()));
        assert!(!is_current("v1|drawings/plan.md|frame=f1a2b3c4|light|vector-image|s1|t1|f1"));
        assert_eq!(key_version("v0|x"), Some(0));
        assert_eq!(key_version("plain"), None);
    }

    #[test]
    fn equal_inputs_give_equal_keys() {
        assert_eq!(key().encode(), key().encode());
    }

    #[test]
    fn every_field_changes_the_key() {
        let base = key().encode();
        let variants = [
            CacheKey { locator: "other.md".to_string(), ..key() },
            CacheKey { subpart: Subpart::Whole, ..key() },
            CacheKey { theme: Theme::Dark, ..key() },
            CacheKey { output: OutputKind::Raster, ..key() },
            CacheKey { scale: 2.0, ..key() },
            CacheKey { transparent: false, ..key() },
            CacheKey { inline_fonts: false, ..key() },
            key().with_width(Some(640)),
            key().with_color_map(Some(&ColorMap::from([(
                "#000000".to_string(),
                "#ff0000".to_string(),
            )]))),
        ];
        for variant in variants {
            assert_ne!(variant.encode(), base, "{variant:?}");
        }
    }

    #[test]
    fn color_maps_are_keyed_by_content() {
        let red = ColorMap::from([("#000000".to_string(), "#ff0000".to_string())]);
        let blue = ColorMap::from([("#000000".to_string(), "#0000ff".to_string())]);
        let digest = color_map_digest(Some(&red)).unwrap();
        assert_eq!(digest.len(), COLOR_DIGEST_LEN);
        assert_eq!(color_map_digest(Some(&red)), Some(digest.clone()));
        assert_ne!(color_map_digest(Some(&blue)), Some(digest));
        assert_eq!(color_map_digest(Some(&ColorMap::new())), None);
        assert_eq!(key().with_color_map(Some(&ColorMap::new())), key());
    }

    #[test]
    fn separators_in_fields_cannot_collide() {
        let a = CacheKey { locator: "a|b".to_string(), subpart: Subpart::Whole, ..key() };
        let b = CacheKey {
            locator: "a".to_string(),
            subpart: Subpart::Section("b".to_string()),
            ..key()
        };
        assert_ne!(a.encode(), b.encode());
        assert!(a.encode().contains("a%7Cb"));
    }

    #[test]
    fn subpart_classification() {
        assert_eq!(Subpart::parse(None), Subpart::Whole);
        assert_eq!(Subpart::parse(Some("^abc")), Subpart::Block("abc".to_string()));
        assert_eq!(Subpart::parse(Some("^area=x")), Subpart::Area("x".to_string()));
        assert_eq!(Subpart::parse(Some("Intro")), Subpart::Section("Intro".to_string()));
        assert_eq!(
            Subpart::parse(Some("page=2&rect=0,0,1,1")),
            Subpart::Page("page=2&rect=0,0,1,1".to_string())
        );
    }
}
