//! What the engines need from the surrounding application.
//!
//! The sync and resolution engines never touch the filesystem, the network or a renderer
//! directly. They go through the traits here, bundled into a [`Host`]. [`FsVault`] implements
//! the I/O side on a plain directory; rendering of the opaque scene payload, PDF pages, formulas
//! and diagrams is left to whatever backend the application plugs in.

use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    error::SceneDocError,
    scene::{Scene, Theme},
};

pub mod fs;

pub use fs::FsVault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime_ms: i64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

#[async_trait]
pub trait FileProvider: Send + Sync {
    async fn read_binary(&self, path: &str) -> Result<Vec<u8>, SceneDocError>;

    async fn stat(&self, path: &str) -> Result<FileStat, SceneDocError>;

    /// Fetch a hyperlink or `file://` URL.
    async fn fetch_url(&self, url: &str) -> Result<FetchedFile, SceneDocError> {
        Err(SceneDocError::Unsupported(format!(
            "this host cannot fetch {url}"
        )))
    }
}

pub trait PathResolver: Send + Sync {
    /// Concrete vault path for `link` as written in the document at `source_path`.
    fn resolve_link(&self, link: &str, source_path: &str) -> Option<String>;
}

/// Stylesheet and font faces the host uses for a theme.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThemeStyles {
    pub css: String,
    pub font_faces: String,
}

#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn read_document(&self, path: &str) -> Result<String, SceneDocError>;

    async fn theme_styles(&self, _theme: Theme) -> Option<ThemeStyles> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneRenderOptions {
    pub theme: Theme,
    pub scale: f64,
    pub transparent: bool,
    pub inline_fonts: bool,
}

impl Default for SceneRenderOptions {
    fn default() -> Self {
        SceneRenderOptions {
            theme: Theme::Light,
            scale: 1.0,
            transparent: true,
            inline_fonts: true,
        }
    }
}

/// A PDF page rendered to PNG, plus the page geometry needed to map crop rectangles.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub png: Vec<u8>,
    /// Unrotated page size in PDF points.
    pub width_pt: f64,
    pub height_pt: f64,
    /// Clockwise page rotation: 0, 90, 180 or 270.
    pub rotation: u32,
}

#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Render a scene (with its `files` already populated) to SVG markup.
    async fn scene_to_svg(
        &self,
        scene: &Scene,
        options: &SceneRenderOptions,
    ) -> Result<String, SceneDocError>;

    async fn render_pdf_page(
        &self,
        _pdf: &[u8],
        page: u32,
        _scale: f64,
    ) -> Result<RenderedPage, SceneDocError> {
        Err(SceneDocError::Unsupported(format!(
            "no PDF renderer for page {page}"
        )))
    }

    async fn render_equation(&self, latex: &str) -> Result<String, SceneDocError> {
        Err(SceneDocError::Unsupported(format!(
            "no LaTeX renderer for {latex}"
        )))
    }

    async fn render_diagram(&self, _source: &str, _theme: Theme) -> Result<String, SceneDocError> {
        Err(SceneDocError::Unsupported(
            "no diagram renderer configured".to_string(),
        ))
    }
}

/// Render backend for hosts without one. Every call fails with `Unsupported`, which the resolver
/// reports as a missing render.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRenderer;

#[async_trait]
impl RenderBackend for NoRenderer {
    async fn scene_to_svg(
        &self,
        _scene: &Scene,
        _options: &SceneRenderOptions,
    ) -> Result<String, SceneDocError> {
        Err(SceneDocError::Unsupported(
            "no scene renderer configured".to_string(),
        ))
    }
}

/// The collaborators handed to the engines.
#[derive(Clone)]
pub struct Host {
    pub files: Arc<dyn FileProvider>,
    pub paths: Arc<dyn PathResolver>,
    pub documents: Arc<dyn DocumentProvider>,
    pub renderer: Arc<dyn RenderBackend>,
}

impl Host {
    /// A host backed by one vault for I/O and `renderer` for rendering.
    pub fn from_vault(vault: FsVault, renderer: Arc<dyn RenderBackend>) -> Self {
        let vault = Arc::new(vault);
        Host {
            files: vault.clone(),
            paths: vault.clone(),
            documents: vault,
            renderer,
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}
