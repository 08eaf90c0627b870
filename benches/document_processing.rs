//! Performance benchmarks for document processing
//!
//! These benchmarks measure:
//! - Loading a large scene document (section detection, normalization, id stabilization)
//! - Saving it back, plain and compressed
//! - Resolving a batch of formulas through the concurrency pool
//!
//! Run with: cargo bench

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, Criterion};
use scenedoc_core::{
    assets::{AssetResolver, EquationRef, WorkItem},
    error::SceneDocError,
    host::{FsVault, Host, RenderBackend, SceneRenderOptions},
    pool::Terminate,
    scene::{Scene, Theme},
    sync::{SceneDocument, SyncContext},
};
use serde_json::json;
use std::sync::Arc;

// A drawing with `count` labelled boxes, each text carrying a link. Ids are foreign so every
// load goes through stabilization.
fn large_document(count: usize) -> String {
    let mut elements = Vec::with_capacity(count * 2);
    let mut texts = String::new();
    for n in 0..count {
        let rect = format!("rectangle-element-{n:06}");
        let text = format!("text-element-{n:06}");
        elements.push(json!({
            "id": rect, "type": "rectangle",
            "x": (n % 20) * 120, "y": (n / 20) * 80, "width": 100, "height": 60,
            "boundElements": [{"id": text, "type": "text"}]
        }));
        elements.push(json!({
            "id": text, "type": "text", "text": "", "containerId": rect
        }));
        texts.push_str(&format!("Box {n} links to [[Note {n}]] ^{text}\n\n"));
    }
    format!(
        "---\nexcalidraw-plugin: parsed\n---\n%%\n# Excalidraw Data\n\n## Text Elements\n{texts}## Drawing\n```json\n{}\n```\n%%",
        serde_json::to_string_pretty(&json!({"type": "excalidraw", "elements": elements})).unwrap()
    )
}

fn bench_load_document(c: &mut Criterion) {
    let text = large_document(500);
    let ctx = SyncContext::default();
    c.bench_function("load_document_500_boxes", |b| {
        b.iter(|| {
            SceneDocument::load("drawing.md", &text, &ctx)
                .unwrap()
                .scene()
                .elements
                .len()
        });
    });
}

fn bench_save_document(c: &mut Criterion) {
    let ctx = SyncContext::default();
    let mut doc = SceneDocument::load("drawing.md", &large_document(500), &ctx).unwrap();
    c.bench_function("save_document_500_boxes", |b| {
        b.iter(|| doc.save().unwrap().len());
    });
    doc.set_compressed(true);
    c.bench_function("save_compressed_document_500_boxes", |b| {
        b.iter(|| doc.save().unwrap().len());
    });
}

struct EchoRenderer;

#[async_trait]
impl RenderBackend for EchoRenderer {
    async fn scene_to_svg(
        &self,
        _scene: &Scene,
        _options: &SceneRenderOptions,
    ) -> Result<String, SceneDocError> {
        Ok("<svg width=\"1\" height=\"1\"/>".to_string())
    }

    async fn render_equation(&self, latex: &str) -> Result<String, SceneDocError> {
        Ok(format!("<svg width=\"{}\" height=\"10\"/>", latex.len()))
    }
}

fn bench_resolve_formulas(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let items: Vec<WorkItem> = (0..200)
        .map(|n| WorkItem::Equation(EquationRef::new(format!("\\sum_{{i=0}}^{{{n}}} i"))))
        .collect();

    c.bench_function("resolve_200_formulas", |b| {
        b.to_async(&rt).iter(|| async {
            // Fresh registry each round so nothing is served from memory.
            let ctx = SyncContext::default();
            let host = Host::from_vault(FsVault::new("."), Arc::new(EchoRenderer));
            let resolver = AssetResolver::new(&ctx, host);
            let mut resolved = 0;
            resolver
                .resolve_scene(
                    "drawing.md",
                    items.clone(),
                    Theme::Light,
                    None,
                    &Terminate::new(),
                    |batch| resolved += batch.len(),
                )
                .await;
            resolved
        });
    });
}

// Benchmark group configuration
criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(50)
        .measurement_time(std::time::Duration::from_secs(10));
    targets =
        bench_load_document,
        bench_save_document,
        bench_resolve_formulas
}

criterion_main!(benches);
