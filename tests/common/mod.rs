//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use async_trait::async_trait;
use image::{ImageFormat, RgbaImage};
use scenedoc_core::{
    assets::{AssetReference, EmbeddedEntry},
    error::SceneDocError,
    event::{Notice, SyncEvent},
    host::{FsVault, Host, RenderBackend, SceneRenderOptions},
    ids::{AssetId, ElementId},
    scene::{Element, ElementKind, ImageData, Scene, Theme},
    sync::{SceneDocument, SyncContext},
};
use std::{
    io::Cursor,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times, subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A scene document with the given text list and drawing elements.
#[allow(dead_code)]
pub fn scene_document(text_section: &str, elements: serde_json::Value) -> String {
    let scene = serde_json::json!({"type": "excalidraw", "version": 2, "elements": elements});
    format!(
        "---\nexcalidraw-plugin: parsed\n---\n# Notes\n\nSome free text.\n\n%%\n# Excalidraw Data\n\n## Text Elements\n{text_section}## Drawing\n```json\n{}\n```\n%%",
        serde_json::to_string_pretty(&scene).unwrap()
    )
}

#[allow(dead_code)]
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    RgbaImage::new(width, height)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Create a vault directory with a raster image, a vector image and two notes.
///
/// Returns the vault root (`<temp_dir>/vault/`).
#[allow(dead_code)]
pub fn create_test_vault(temp_dir: &TempDir) -> PathBuf {
    let vault = temp_dir.path().join("vault");
    std::fs::create_dir_all(vault.join("attachments")).unwrap();
    std::fs::write(vault.join("attachments/photo.png"), png_bytes(4, 3)).unwrap();
    std::fs::write(
        vault.join("attachments/icon.svg"),
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="32" height="16"><rect fill="#000000" width="32" height="16"/></svg>"##,
    )
    .unwrap();
    std::fs::write(
        vault.join("Book.md"),
        "---\ntitle: Book\n---\nThe opening line ^intro1\n\n# Chapter\nChapter body\n",
    )
    .unwrap();
    std::fs::write(vault.join("Other Note.md"), "# Other\n").unwrap();
    vault
}

/// Write a scene document whose only element is one image per embedded entry.
#[allow(dead_code)]
pub fn write_embedding_document(
    vault: &Path,
    path: &str,
    entries: Vec<EmbeddedEntry>,
    ctx: &SyncContext,
) -> Vec<AssetId> {
    let mut doc = SceneDocument::new(path, ctx);
    let mut scene: Scene = doc.scene().clone();
    let mut ids = Vec::new();
    for (n, entry) in entries.into_iter().enumerate() {
        let id = doc.add_asset(entry);
        let mut element = Element::new(
            ElementId::from(format!("img{n:05}").as_str()),
            ElementKind::Image(ImageData {
                file_id: Some(id.clone()),
                status: "saved".to_string(),
            }),
        );
        element.width = 100.0;
        element.height = 100.0;
        scene.elements.push(element);
        ids.push(id);
    }
    doc.sync_from_scene(scene);
    let full = vault.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, doc.save().unwrap()).unwrap();
    ids
}

#[allow(dead_code)]
pub fn vault_entry(path: &str) -> EmbeddedEntry {
    EmbeddedEntry::Asset(AssetReference::vault_file(
        AssetId::from_source_text(path),
        path,
    ))
}

/// Renderer producing tiny deterministic SVGs and counting its calls.
#[derive(Default)]
pub struct MockRenderer {
    pub scene_calls: AtomicUsize,
    pub equation_calls: AtomicUsize,
    /// Formulas containing this text take a minute to render.
    pub slow_marker: Option<String>,
}

#[allow(dead_code)]
impl MockRenderer {
    pub fn slow_on(marker: &str) -> Self {
        MockRenderer {
            slow_marker: Some(marker.to_string()),
            ..MockRenderer::default()
        }
    }

    pub fn scene_calls(&self) -> usize {
        self.scene_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderBackend for MockRenderer {
    async fn scene_to_svg(
        &self,
        scene: &Scene,
        options: &SceneRenderOptions,
    ) -> Result<String, SceneDocError> {
        self.scene_calls.fetch_add(1, Ordering::SeqCst);
        let fill = match options.theme {
            Theme::Light => "#000000",
            Theme::Dark => "#ffffff",
        };
        Ok(format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="50" data-files="{}"><rect fill="{fill}"/></svg>"#,
            50 * scene.elements.len().max(1),
            scene.files.len()
        ))
    }

    async fn render_equation(&self, latex: &str) -> Result<String, SceneDocError> {
        self.equation_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .slow_marker
            .as_deref()
            .is_some_and(|marker| latex.contains(marker))
        {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="12"><path fill="#000000" d="M0 0"/></svg>"##,
            10 * latex.len()
        ))
    }
}

#[allow(dead_code)]
pub fn vault_host(vault: &Path, renderer: Arc<MockRenderer>) -> Host {
    Host::from_vault(FsVault::new(vault), renderer)
}

/// Notices received so far.
#[allow(dead_code)]
pub fn drain_notices(rx: &mut UnboundedReceiver<SyncEvent>) -> Vec<Notice> {
    let mut notices = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SyncEvent::Notice(notice) = event {
            notices.push(notice);
        }
    }
    notices
}
