//! Turning embedded file references into inline images.
//!
//! Dispatch is by reference kind and, for vault files, by extension:
//!
//! | source                  | output                                          |
//! |-------------------------|-------------------------------------------------|
//! | URL, `file://`          | fetched bytes, vector color map applied         |
//! | `.svg`                  | color-mapped markup                             |
//! | `.pdf`                  | PNG of one page, optionally cropped             |
//! | scene document          | SVG of the (sub)scene, nested images resolved   |
//! | other `.md`             | SVG with the rendered document                  |
//! | formula, diagram        | backend render, shared through the registry     |
//! | anything else           | raster bytes as they are                        |
//!
//! Failures never propagate. A missing file produces one notice and, after the configured
//! number of attempts, is no longer looked up. Anything else is logged and reported once.

use futures::future::BoxFuture;
use image::ImageReader;
use std::{
    collections::{BTreeMap, HashSet},
    io::Cursor,
    path::Path,
    sync::Arc,
};

use crate::{
    assets::{
        batch::WorkItem,
        markdown::render_markdown_svg,
        nested::{select_subset, SceneSubset},
        pdf::{render_pdf_target, PdfTarget},
        reference::{AssetKind, AssetReference, ColorMap, DiagramRef, EquationRef},
        registry::SharedRegistry,
        svg::{remap_colors, svg_natural_size},
    },
    cache::{CacheKey, ContentCache, OutputKind, RenderPayload},
    config::SyncConfig,
    error::SceneDocError,
    event::{emit, EventSender, Notice, SyncEvent},
    host::{Host, SceneRenderOptions},
    ids::AssetId,
    link::{extract_block, extract_section, parse_links, strip_front_matter},
    scene::{InlineAsset, Scene, Size, ThemedVariant, Theme},
    sync::{sections::is_scene_document, SceneDocument, SyncContext},
};

const SVG_MIME: &str = "image/svg+xml";
const PNG_MIME: &str = "image/png";

/// Black strokes of formulas become white in the dark theme.
fn dark_formula_colors() -> ColorMap {
    BTreeMap::from([
        ("#000".to_string(), "#fff".to_string()),
        ("#000000".to_string(), "#ffffff".to_string()),
        ("black".to_string(), "white".to_string()),
        ("currentColor".to_string(), "#ffffff".to_string()),
    ])
}

fn raster_size(bytes: &[u8]) -> Result<Size, SceneDocError> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?;
    Ok(Size::new(width as f64, height as f64))
}

fn extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn vector_asset(svg: &str, color_map: Option<&ColorMap>) -> Result<InlineAsset, SceneDocError> {
    let svg = match color_map {
        Some(map) => remap_colors(svg, map)?,
        None => svg.to_string(),
    };
    let size = svg_natural_size(&svg).unwrap_or_default();
    Ok(InlineAsset::new(SVG_MIME, svg.as_bytes(), size))
}

pub struct AssetResolver {
    ctx: SyncContext,
    host: Host,
    cache: ContentCache,
}

impl AssetResolver {
    pub fn new(ctx: &SyncContext, host: Host) -> Self {
        AssetResolver {
            ctx: ctx.clone(),
            host,
            cache: ContentCache::disabled(),
        }
    }

    pub fn with_cache(mut self, cache: ContentCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &Arc<SyncConfig> {
        &self.ctx.config
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.ctx.registry
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub(crate) fn events(&self) -> Option<&EventSender> {
        self.ctx.events.as_ref()
    }

    /// Produce the inline image for one item embedded in the document at `source`.
    pub async fn resolve_one(
        &self,
        item: &WorkItem,
        source: &str,
        theme: Theme,
    ) -> Option<InlineAsset> {
        self.resolve_at(item, source, 0, &[], theme).await
    }

    /// `rendering` lists the plain documents being rendered as images on the chain of embeds
    /// that led here.
    fn resolve_at<'a>(
        &'a self,
        item: &'a WorkItem,
        source: &'a str,
        depth: usize,
        rendering: &'a [String],
        theme: Theme,
    ) -> BoxFuture<'a, Option<InlineAsset>> {
        Box::pin(async move {
            let id = item.id();
            let limit = self.ctx.config.resolve.missing_asset_retry_limit;
            if self.ctx.registry.missing_count(id) >= limit {
                tracing::debug!("[AssetResolver] {} gave up after {limit} misses", item.locator());
                return None;
            }
            let result = match item {
                WorkItem::Asset(asset) => {
                    self.resolve_asset(asset, source, depth, rendering, theme).await
                }
                WorkItem::Equation(eq) => self.resolve_equation(eq, theme).await,
                WorkItem::Diagram(diagram) => self.resolve_diagram(diagram, theme).await,
            };
            match result {
                Ok(asset) => {
                    self.ctx.registry.clear_missing(id);
                    asset
                }
                Err(e) if e.is_not_found() => {
                    let misses = self.ctx.registry.record_missing(id);
                    tracing::debug!("[AssetResolver] {} not found ({misses}): {e}", item.locator());
                    self.notify(Notice::AssetMissing {
                        asset: id.clone(),
                        locator: item.locator().to_string(),
                    });
                    None
                }
                Err(e) => {
                    self.notify(Notice::RenderFailed {
                        locator: item.locator().to_string(),
                        reason: e.to_string(),
                    });
                    None
                }
            }
        })
    }

    fn notify(&self, notice: Notice) {
        if self.ctx.registry.first_notice(&notice) {
            tracing::warn!("[AssetResolver] {notice}");
            emit(self.events(), SyncEvent::Notice(notice));
        } else {
            tracing::debug!("[AssetResolver] repeated notice suppressed: {notice}");
        }
    }

    fn options(&self, theme: Theme) -> SceneRenderOptions {
        SceneRenderOptions {
            theme,
            ..SceneRenderOptions::default()
        }
    }

    async fn resolve_asset(
        &self,
        asset: &AssetReference,
        source: &str,
        depth: usize,
        rendering: &[String],
        theme: Theme,
    ) -> Result<Option<InlineAsset>, SceneDocError> {
        if asset.kind != AssetKind::VaultFile {
            return self.resolve_url(asset).await.map(Some);
        }
        let path = self
            .host
            .paths
            .resolve_link(asset.path(), source)
            .unwrap_or_else(|| asset.path().to_string());
        self.cache.record_embed(source, &path);

        match extension(&path).as_str() {
            "svg" => {
                let bytes = self.host.files.read_binary(&path).await?;
                let svg = String::from_utf8(bytes)?;
                vector_asset(&svg, asset.color_map.as_ref()).map(Some)
            }
            "pdf" => self.resolve_pdf(asset, &path).await.map(Some),
            "excalidraw" => {
                let text = self.host.documents.read_document(&path).await?;
                self.resolve_nested(asset, &path, &text, depth, rendering, theme)
                    .await
            }
            "md" => {
                let text = self.host.documents.read_document(&path).await?;
                if is_scene_document(&text) {
                    self.resolve_nested(asset, &path, &text, depth, rendering, theme)
                        .await
                } else {
                    self.resolve_markdown(asset, &path, &text, depth, rendering, theme)
                        .await
                }
            }
            _ => {
                let bytes = self.host.files.read_binary(&path).await?;
                let mime = mime_guess::from_path(&path).first_or_octet_stream();
                let size = raster_size(&bytes)?;
                Ok(Some(InlineAsset::new(mime.essence_str(), &bytes, size)))
            }
        }
    }

    async fn resolve_url(&self, asset: &AssetReference) -> Result<InlineAsset, SceneDocError> {
        let fetched = self.host.files.fetch_url(&asset.locator).await?;
        let mime = fetched.mime_type.unwrap_or_else(|| {
            mime_guess::from_path(&asset.locator)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
        if mime.starts_with(SVG_MIME) {
            let svg = String::from_utf8(fetched.bytes)?;
            return vector_asset(&svg, asset.color_map.as_ref());
        }
        let size = raster_size(&fetched.bytes)?;
        Ok(InlineAsset::new(&mime, &fetched.bytes, size))
    }

    async fn resolve_pdf(
        &self,
        asset: &AssetReference,
        path: &str,
    ) -> Result<InlineAsset, SceneDocError> {
        let pdf_config = &self.ctx.config.pdf;
        let options = SceneRenderOptions {
            scale: pdf_config.scale,
            ..SceneRenderOptions::default()
        };
        let key = CacheKey::new(path, asset.subpart(), OutputKind::Raster, &options);
        if let Some(hit) = self.cache.get(&key, self.host.files.as_ref()).await {
            return Ok(hit.to_inline_asset());
        }
        let bytes = self.host.files.read_binary(path).await?;
        let target = PdfTarget::parse(asset.subpart());
        let (png, size) =
            render_pdf_target(self.host.renderer.as_ref(), &bytes, target, pdf_config).await?;
        self.store(&key, &RenderPayload::Raster(png.clone()), size)
            .await;
        Ok(InlineAsset::new(PNG_MIME, &png, size))
    }

    async fn store(&self, key: &CacheKey, payload: &RenderPayload, size: Size) {
        if let Err(e) = self
            .cache
            .put(key, payload, size, self.host.files.as_ref())
            .await
        {
            tracing::warn!("[AssetResolver] could not cache {key}: {e}");
        }
    }

    /// Render another scene document as an image.
    async fn resolve_nested(
        &self,
        asset: &AssetReference,
        path: &str,
        text: &str,
        depth: usize,
        rendering: &[String],
        theme: Theme,
    ) -> Result<Option<InlineAsset>, SceneDocError> {
        let max_depth = self.ctx.config.resolve.max_scene_depth;
        if depth >= max_depth {
            self.notify(Notice::RecursionLimit {
                locator: path.to_string(),
                depth,
            });
            return Ok(None);
        }
        let subpart = asset.subpart();
        let color_map = asset.color_map.as_ref();
        let key = CacheKey::new(path, subpart, OutputKind::VectorImage, &self.options(theme))
            .with_color_map(color_map);
        if let Some(hit) = self.cache.get(&key, self.host.files.as_ref()).await {
            return Ok(Some(hit.to_inline_asset()));
        }

        let mut doc = if extension(path) == "excalidraw" {
            SceneDocument::from_scene_json(path, text, &self.ctx)?
        } else {
            SceneDocument::load(path, text, &self.ctx)?
        };
        doc.resolve_texts(&self.host).await;
        let mut scene = select_subset(doc.scene(), &SceneSubset::parse(subpart));

        // Embeds are re-recorded while the nested images resolve.
        self.cache.clear_embeds(path);
        let wanted: HashSet<AssetId> = scene
            .referenced_assets()
            .into_iter()
            .filter(|id| !scene.files.contains_key(id))
            .collect();
        for item in doc.work_items(Some(&wanted)) {
            let resolved = self
                .resolve_at(&item, path, depth + 1, rendering, theme)
                .await;
            if let Some(inline) = resolved {
                scene.files.insert(item.id().clone(), inline);
            }
        }

        let has_raster = scene.files.values().any(|f| !f.mime_type.starts_with(SVG_MIME));
        if !has_raster {
            let inline = self.render_scene(&scene, path, subpart, theme, color_map).await?;
            return Ok(Some(inline));
        }
        // Raster content cannot be recolored, so both themes are rendered up front.
        let mut inline = self
            .render_scene(&scene, path, subpart, Theme::Light, color_map)
            .await?;
        let dark = self
            .render_scene(&scene, path, subpart, Theme::Dark, color_map)
            .await?;
        inline.themed_variant = Some(ThemedVariant {
            theme: Theme::Dark,
            data_url: dark.data_url,
        });
        Ok(Some(inline))
    }

    async fn render_scene(
        &self,
        scene: &Scene,
        path: &str,
        subpart: Option<&str>,
        theme: Theme,
        color_map: Option<&ColorMap>,
    ) -> Result<InlineAsset, SceneDocError> {
        let options = self.options(theme);
        let svg = self.host.renderer.scene_to_svg(scene, &options).await?;
        let svg = match color_map {
            Some(map) => remap_colors(&svg, map)?,
            None => svg,
        };
        let size = svg_natural_size(&svg).unwrap_or_default();
        let key = CacheKey::new(path, subpart, OutputKind::VectorImage, &options)
            .with_color_map(color_map);
        self.store(&key, &RenderPayload::Vector(svg.clone()), size)
            .await;
        Ok(InlineAsset::new(SVG_MIME, svg.as_bytes(), size))
    }

    /// Render a plain document as an image, with its own image embeds inlined.
    async fn resolve_markdown(
        &self,
        asset: &AssetReference,
        path: &str,
        text: &str,
        depth: usize,
        rendering: &[String],
        theme: Theme,
    ) -> Result<Option<InlineAsset>, SceneDocError> {
        if rendering.iter().any(|doc| doc == path) {
            self.notify(Notice::RecursionCycle {
                locator: path.to_string(),
            });
            return Ok(None);
        }
        let subpart = asset.subpart();
        let width = asset.size_hint.width;
        let key = CacheKey::new(path, subpart, OutputKind::VectorNative, &self.options(theme))
            .with_width(width);
        if let Some(hit) = self.cache.get(&key, self.host.files.as_ref()).await {
            return Ok(Some(hit.to_inline_asset()));
        }

        let content = match subpart {
            Some(sub) => match sub.strip_prefix('^') {
                Some(block) => extract_block(text, block),
                None => extract_section(text, sub),
            }
            .ok_or_else(|| SceneDocError::NotFound(format!("{path}#{sub}")))?,
            None => strip_front_matter(text).to_string(),
        };
        self.cache.clear_embeds(path);
        let mut chain = rendering.to_vec();
        chain.push(path.to_string());
        let content = self
            .inline_image_embeds(&content, path, depth, &chain, theme)
            .await;

        let styles = self.host.documents.theme_styles(theme).await;
        let mut config = self.ctx.config.markdown_embed.clone();
        if let Some(width) = width {
            config.width = width as f64;
        }
        let image = render_markdown_svg(&content, &config, theme, styles.as_ref());
        self.store(&key, &RenderPayload::Vector(image.svg.clone()), image.size)
            .await;
        Ok(Some(InlineAsset::new(SVG_MIME, image.svg.as_bytes(), image.size)))
    }

    /// Replace `![[file]]` embeds with data URL images. Embeds that fail show their name.
    async fn inline_image_embeds(
        &self,
        content: &str,
        path: &str,
        depth: usize,
        rendering: &[String],
        theme: Theme,
    ) -> String {
        let mut out = String::with_capacity(content.len());
        let mut position = 0;
        for token in parse_links(content) {
            if !(token.is_transclusion && token.is_wiki) {
                continue;
            }
            out.push_str(&content[position..token.range.start]);
            position = token.range.end;
            let link = token.link();
            let item = WorkItem::Asset(AssetReference::vault_file(
                AssetId::from_source_text(&link),
                link,
            ));
            let name = token.alias_or_link();
            match self
                .resolve_at(&item, path, depth + 1, rendering, theme)
                .await
            {
                Some(inline) => out.push_str(&format!("![{name}]({})", inline.data_url)),
                None => out.push_str(&name),
            }
        }
        out.push_str(&content[position..]);
        out
    }

    async fn resolve_equation(
        &self,
        eq: &EquationRef,
        theme: Theme,
    ) -> Result<Option<InlineAsset>, SceneDocError> {
        if let Some(rendered) = self.ctx.registry.rendered(&eq.id, theme) {
            return Ok(Some(rendered));
        }
        self.ctx.registry.register_equation(eq.clone());
        // One backend render serves both themes; dark is a recolored copy.
        let svg = self.host.renderer.render_equation(&eq.source_text).await?;
        let light = vector_asset(&svg, None)?;
        let dark = vector_asset(&svg, Some(&dark_formula_colors()))?;
        self.ctx.registry.store_render(&eq.id, Theme::Light, light.clone());
        self.ctx.registry.store_render(&eq.id, Theme::Dark, dark.clone());
        Ok(Some(match theme {
            Theme::Light => light,
            Theme::Dark => dark,
        }))
    }

    async fn resolve_diagram(
        &self,
        diagram: &DiagramRef,
        theme: Theme,
    ) -> Result<Option<InlineAsset>, SceneDocError> {
        if let Some(rendered) = self.ctx.registry.rendered(&diagram.id, theme) {
            return Ok(Some(rendered));
        }
        self.ctx.registry.register_diagram(diagram.clone());
        let svg = self
            .host
            .renderer
            .render_diagram(&diagram.source_text, theme)
            .await?;
        let inline = vector_asset(&svg, None)?;
        self.ctx.registry.store_render(&diagram.id, theme, inline.clone());
        Ok(Some(inline))
    }
}

impl std::fmt::Debug for AssetResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetResolver")
            .field("ctx", &self.ctx)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
