//! Inline link, transclusion and checkbox syntax.
//!
//! Recognized forms inside a text run:
//!
//! | Syntax | Meaning |
//! |---|---|
//! | `[[target]]`, `[[target\|alias]]` | wiki link |
//! | `[alias](target)` | markdown link |
//! | `![[target]]`, `![[target#heading]]`, `![[target#^block]]` | transclusion |
//! | any of the above followed by `{N}` | wrap the displayed text at N columns |
//! | `- [ ] ` / `- [x] ` at line start | checkbox |
//!
//! Everything here is pure string processing. Reading the documents a transclusion points at is
//! the job of [`crate::sync::text`].

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::ops::Range;

static LINK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(!)?(\[\[([^|\]]+)\|?([^\]]+)?\]\]|\[([^\]]*)\]\(((?:[^\(\)]|\([^\(\)]*\))*)\))(\{(\d+)\})?",
    )
    .expect("static link pattern")
});

static URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:https?|ftp|file)://[^\s\)\]]+").expect("static url pattern"));

static CHECKBOX_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^- \[\s\]\s").expect("static"));

static CHECKBOX_DONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^- \[[^\s\]]\]\s").expect("static"));

/// One link occurrence in a text run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkToken {
    /// Byte range of the whole match, wrap suffix included.
    pub range: Range<usize>,
    pub is_transclusion: bool,
    pub is_wiki: bool,
    /// Link destination without the `#...` subpart.
    pub path: String,
    /// `heading` or `^block` after the `#`, if any.
    pub subpath: Option<String>,
    pub alias: Option<String>,
    pub wrap: Option<usize>,
}

impl LinkToken {
    fn from_captures(caps: &Captures<'_>) -> Option<LinkToken> {
        let whole = caps.get(0)?;
        let is_wiki = caps.get(3).is_some();
        let target = if is_wiki {
            caps.get(3)?.as_str()
        } else {
            caps.get(6)?.as_str()
        };
        let alias = if is_wiki {
            caps.get(4).map(|m| m.as_str().to_string())
        } else {
            caps.get(5)
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.is_empty())
        };
        let (path, subpath) = split_subpath(target.trim());
        Some(LinkToken {
            range: whole.range(),
            is_transclusion: caps.get(1).is_some(),
            is_wiki,
            path,
            subpath,
            alias,
            wrap: caps.get(8).and_then(|m| m.as_str().parse().ok()),
        })
    }

    /// Link as written, `path#subpath`.
    pub fn link(&self) -> String {
        match &self.subpath {
            Some(sub) => format!("{}#{}", self.path, sub),
            None => self.path.clone(),
        }
    }

    /// Text shown in place of the link.
    pub fn alias_or_link(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.link())
    }

    pub fn is_url(&self) -> bool {
        URL_REGEX.find(&self.path).map(|m| m.start()) == Some(0)
    }

    /// The `^block` id of a block transclusion.
    pub fn block_ref(&self) -> Option<&str> {
        self.subpath.as_deref().and_then(|s| s.strip_prefix('^'))
    }

    /// The heading of a section transclusion.
    pub fn heading(&self) -> Option<&str> {
        self.subpath.as_deref().filter(|s| !s.starts_with('^'))
    }
}

fn split_subpath(target: &str) -> (String, Option<String>) {
    match target.split_once('#') {
        Some((path, sub)) if !sub.is_empty() => (path.to_string(), Some(sub.to_string())),
        Some((path, _)) => (path.to_string(), None),
        None => (target.to_string(), None),
    }
}

/// All links in `text`, in order of appearance.
pub fn parse_links(text: &str) -> Vec<LinkToken> {
    LINK_REGEX
        .captures_iter(text)
        .filter_map(|caps| LinkToken::from_captures(&caps))
        .collect()
}

pub fn has_transclusion(text: &str) -> bool {
    LINK_REGEX
        .captures_iter(text)
        .any(|caps| caps.get(1).is_some())
}

/// First bare URL in `text`.
pub fn find_url(text: &str) -> Option<&str> {
    URL_REGEX.find(text).map(|m| m.as_str())
}

/// Replace `- [ ] ` / `- [x] ` list markers with the configured glyphs.
pub fn apply_checkboxes(text: &str, unchecked: &str, checked: &str) -> String {
    let open = format!("{unchecked} ");
    let done = format!("{checked} ");
    let text = CHECKBOX_OPEN.replace_all(text, regex::NoExpand(&open));
    CHECKBOX_DONE
        .replace_all(&text, regex::NoExpand(&done))
        .into_owned()
}

/// Hard-wrap `text` at `width` columns, breaking on whitespace where possible.
pub fn wrap_text(text: &str, width: usize) -> String {
    if width == 0 {
        return text.to_string();
    }
    text.split('\n')
        .map(|line| wrap_line(line, width))
        .collect::<Vec<_>>()
        .join("\n")
}

fn wrap_line(line: &str, width: usize) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in line.split(' ') {
        let mut word = word.to_string();
        while word.chars().count() > width {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            let head: String = word.chars().take(width).collect();
            word = word.chars().skip(width).collect();
            out.push(head);
        }
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    out.push(current);
    out.join("\n")
}

/// Remove a leading `---` front matter block.
pub fn strip_front_matter(doc: &str) -> &str {
    if let Some(rest) = doc.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---\n") {
            return &rest[end + 5..];
        }
        if rest.ends_with("\n---") {
            return "";
        }
    }
    doc
}

/// The paragraph (or list item) carrying `^block_id`, with the marker removed.
pub fn extract_block(doc: &str, block_id: &str) -> Option<String> {
    let marker = format!("^{block_id}");
    let body = strip_front_matter(doc);
    for paragraph in body.split("\n\n") {
        let trimmed = paragraph.trim_end();
        if let Some(content) = trimmed.strip_suffix(&marker) {
            return Some(content.trim().to_string());
        }
    }
    None
}

fn heading_level(line: &str) -> Option<(usize, &str)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    rest.strip_prefix(' ').map(|title| (hashes, title.trim()))
}

/// The section under `heading` up to the next heading of the same or a higher level, heading
/// line excluded.
pub fn extract_section(doc: &str, heading: &str) -> Option<String> {
    let body = strip_front_matter(doc);
    let wanted = heading.trim();
    let mut level = None;
    let mut lines = Vec::new();
    for line in body.lines() {
        match (level, heading_level(line)) {
            (None, Some((l, title))) if title.eq_ignore_ascii_case(wanted) => level = Some(l),
            (Some(current), Some((l, _))) if l <= current => break,
            (Some(_), _) => lines.push(line),
            _ => {}
        }
    }
    level.map(|_| lines.join("\n").trim().to_string())
}

/// Truncate to `budget` characters.
pub fn truncate_chars(text: &str, budget: usize) -> String {
    text.chars().take(budget).collect()
}
