//! Turning a text element's raw markup into what the drawing displays.

use crate::{
    config::LinkConfig,
    error::SceneDocError,
    host::{DocumentProvider, PathResolver},
    link::{
        apply_checkboxes, extract_block, extract_section, find_url, has_transclusion,
        parse_links, strip_front_matter, truncate_chars, wrap_text, LinkToken,
    },
};

/// Raw markup of a text element and, once resolved, its display form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextBinding {
    pub raw: String,
    /// `None` until resolved; reset whenever `raw` changes.
    pub parsed: Option<String>,
}

impl TextBinding {
    pub fn new(raw: impl Into<String>) -> Self {
        TextBinding {
            raw: raw.into(),
            parsed: None,
        }
    }

    /// Replace the raw text, dropping the stale display form. Returns whether anything changed.
    pub fn set_raw(&mut self, raw: &str) -> bool {
        if self.raw == raw {
            return false;
        }
        self.raw = raw.to_string();
        self.parsed = None;
        true
    }
}

/// Display text and the link the element should open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedText {
    pub text: String,
    pub link: Option<String>,
}

pub struct TextResolver<'a> {
    config: &'a LinkConfig,
}

impl<'a> TextResolver<'a> {
    pub fn new(config: &'a LinkConfig) -> Self {
        TextResolver { config }
    }

    /// Resolve `raw` without I/O. `None` when it contains a transclusion.
    pub fn quick_parse(&self, raw: &str) -> Option<ParsedText> {
        if has_transclusion(raw) {
            return None;
        }
        Some(self.render(raw, |_| None))
    }

    /// Resolve `raw`, reading transcluded documents through `documents`.
    pub async fn parse(
        &self,
        raw: &str,
        source_path: &str,
        paths: &dyn PathResolver,
        documents: &dyn DocumentProvider,
    ) -> ParsedText {
        if let Some(quick) = self.quick_parse(raw) {
            return quick;
        }
        let mut inlined = Vec::new();
        for token in parse_links(raw).into_iter().filter(|t| t.is_transclusion) {
            let content = match self.transclude(&token, source_path, paths, documents).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::debug!(
                        "[TextResolver] transclusion {} from {source_path} not resolved: {e}",
                        token.link()
                    );
                    token.alias_or_link()
                }
            };
            inlined.push(content);
        }
        self.render(raw, |index| inlined.get(index).cloned())
    }

    async fn transclude(
        &self,
        token: &LinkToken,
        source_path: &str,
        paths: &dyn PathResolver,
        documents: &dyn DocumentProvider,
    ) -> Result<String, SceneDocError> {
        let path = paths
            .resolve_link(&token.path, source_path)
            .ok_or_else(|| SceneDocError::NotFound(token.path.clone()))?;
        let doc = documents.read_document(&path).await?;
        let content = if let Some(block) = token.block_ref() {
            extract_block(&doc, block)
                .ok_or_else(|| SceneDocError::NotFound(format!("{path}#^{block}")))?
        } else if let Some(heading) = token.heading() {
            extract_section(&doc, heading)
                .ok_or_else(|| SceneDocError::NotFound(format!("{path}#{heading}")))?
        } else {
            strip_front_matter(&doc).trim().to_string()
        };
        let content = truncate_chars(&content, self.config.transclusion_char_budget);
        let width = token.wrap.unwrap_or(self.config.default_wrap_width);
        Ok(wrap_text(&content, width))
    }

    /// Assemble display text. `inline` supplies content for the n-th transclusion.
    fn render<F>(&self, raw: &str, inline: F) -> ParsedText
    where
        F: Fn(usize) -> Option<String>,
    {
        let text = apply_checkboxes(
            raw,
            &self.config.checkbox_unchecked,
            &self.config.checkbox_checked,
        );
        let tokens = parse_links(&text);
        let mut out = String::with_capacity(text.len());
        let mut position = 0;
        let mut first_link: Option<&LinkToken> = None;
        let mut transclusions = 0;
        for token in &tokens {
            out.push_str(&text[position..token.range.start]);
            position = token.range.end;
            if token.is_transclusion {
                out.push_str(&inline(transclusions).unwrap_or_else(|| token.alias_or_link()));
                transclusions += 1;
                continue;
            }
            first_link.get_or_insert(token);
            let shown = token.alias_or_link();
            if self.config.show_link_brackets && token.is_wiki {
                out.push_str(&format!("[[{shown}]]"));
            } else {
                out.push_str(&shown);
            }
        }
        out.push_str(&text[position..]);

        let (link, prefix) = match first_link {
            Some(token) if token.is_url() => (Some(token.link()), &self.config.url_prefix),
            Some(token) if token.is_wiki => {
                (Some(format!("[[{}]]", token.link())), &self.config.link_prefix)
            }
            Some(token) => (Some(token.link()), &self.config.link_prefix),
            None => match find_url(&out) {
                Some(url) => (Some(url.to_string()), &self.config.url_prefix),
                None => (None, &self.config.link_prefix),
            },
        };
        let text = match &link {
            Some(_) => format!("{prefix}{out}"),
            None => out,
        };
        ParsedText { text, link }
    }
}
