//! Identifiers used for cross-references inside a document.
//!
//! Elements carry an [`ElementId`]. Ids produced by this crate are exactly [`STABLE_ID_LEN`]
//! characters long so they can be written as `^blockref` markers in the document text. Ids of any
//! other shape (pasted from another scene, imported from a file, hand-edited) are *foreign* and
//! get rewritten once by the sync engine, see [`crate::sync::stabilize`].
//!
//! Assets carry an [`AssetId`], derived from content or source text so identical formulas and
//! images map to the same id across documents.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Length of an element id that may appear in a `^blockref` marker.
pub const STABLE_ID_LEN: usize = 8;

/// Length of a content-derived [`AssetId`].
pub const ASSET_ID_LEN: usize = 40;

const ID_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

#[derive(Clone, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// A fresh random id of [`STABLE_ID_LEN`] characters.
    pub fn generate() -> Self {
        let bytes = *Uuid::new_v4().as_bytes();
        let id = bytes[..STABLE_ID_LEN]
            .iter()
            .map(|b| ID_ALPHABET[(b & 63) as usize] as char)
            .collect::<String>();
        ElementId(id)
    }

    /// A fresh id guaranteed not to collide with any id for which `taken` returns true.
    pub fn generate_unique<F: Fn(&ElementId) -> bool>(taken: F) -> Self {
        loop {
            let candidate = ElementId::generate();
            if !taken(&candidate) {
                return candidate;
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ids of exactly [`STABLE_ID_LEN`] characters from the generated alphabet are owned by this
    /// document. Everything else is foreign, shorter ids included.
    pub fn is_stable(&self) -> bool {
        self.0.len() == STABLE_ID_LEN && self.0.bytes().all(|b| ID_ALPHABET.contains(&b))
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        ElementId(value.to_string())
    }
}

impl From<String> for ElementId {
    fn from(value: String) -> Self {
        ElementId(value)
    }
}

impl From<ElementId> for String {
    fn from(val: ElementId) -> Self {
        val.0
    }
}

impl Display for ElementId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an entry in a scene's `files` map.
#[derive(Clone, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    /// Content-addressed id: the first [`ASSET_ID_LEN`] hex characters of the SHA-256 digest.
    pub fn from_content(bytes: &[u8]) -> Self {
        let digest = hex::encode(Sha256::digest(bytes));
        AssetId(digest[..ASSET_ID_LEN].to_string())
    }

    /// Id for a formula or diagram, derived from its source text.
    pub fn from_source_text(text: &str) -> Self {
        AssetId::from_content(text.as_bytes())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AssetId {
    fn from(value: &str) -> Self {
        AssetId(value.to_string())
    }
}

impl From<String> for AssetId {
    fn from(value: String) -> Self {
        AssetId(value)
    }
}

impl Display for AssetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hex SHA-256 of arbitrary text, used for keys that must not embed the text itself.
pub fn text_digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_stable_length() {
        for _ in 0..64 {
            let id = ElementId::generate();
            assert_eq!(id.as_str().len(), STABLE_ID_LEN);
            assert!(id.is_stable());
            assert!(id
                .as_str()
                .bytes()
                .all(|b| ID_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn only_generated_shapes_are_stable() {
        assert!(!ElementId::from("abcdefghijklmn").is_stable());
        assert!(ElementId::from("abcdefgh").is_stable());
        assert!(ElementId::from("a_c-e0g9").is_stable());
        assert!(!ElementId::from("abc").is_stable());
        assert!(!ElementId::from("").is_stable());
        assert!(!ElementId::from("abc.efgh").is_stable());
        assert!(!ElementId::from("abcdéfg").is_stable());
    }

    #[test]
    fn generate_unique_avoids_taken() {
        let mut taken = HashSet::new();
        for _ in 0..200 {
            let id = ElementId::generate_unique(|c| taken.contains(c));
            assert!(taken.insert(id));
        }
    }

    #[test]
    fn asset_ids_are_content_derived() {
        let a = AssetId::from_source_text("e=mc^2");
        let b = AssetId::from_source_text("e=mc^2");
        let c = AssetId::from_source_text("e=mc^3");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), ASSET_ID_LEN);
    }
}
