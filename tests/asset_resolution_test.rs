//! Resolving embedded files, nested scenes, formulas and documents into inline images.

mod common;

use common::{
    create_test_vault, drain_notices, vault_entry, vault_host, write_embedding_document,
    MockRenderer,
};
use scenedoc_core::{
    assets::{AssetReference, AssetResolver, EmbeddedEntry, EquationRef, WorkItem},
    config::{ResolveConfig, SyncConfig},
    event::{Notice, SyncEvent},
    host::{FsVault, Host},
    ids::AssetId,
    pool::Terminate,
    scene::{Size, Theme},
    sync::{SceneDocument, SyncContext},
};
use std::{collections::HashSet, sync::Arc};
use tempfile::TempDir;
use tokio::sync::mpsc::unbounded_channel;

fn load(vault: &std::path::Path, path: &str, ctx: &SyncContext) -> SceneDocument {
    let text = std::fs::read_to_string(vault.join(path)).unwrap();
    SceneDocument::load(path, &text, ctx).unwrap()
}

#[test_log::test(tokio::test)]
async fn vault_images_are_inlined_with_their_sizes() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    let ctx = SyncContext::default();
    let ids = write_embedding_document(
        &vault,
        "drawing.md",
        vec![
            vault_entry("attachments/photo.png"),
            vault_entry("attachments/icon.svg"),
        ],
        &ctx,
    );
    let mut doc = load(&vault, "drawing.md", &ctx);
    assert_eq!(doc.work_items(None).len(), 2);

    let resolver = AssetResolver::new(&ctx, vault_host(&vault, Arc::new(MockRenderer::default())));
    let summary = resolver
        .resolve_document(&mut doc, Theme::Light, &Terminate::new())
        .await;
    assert_eq!(summary.completed, 2);

    let png = &doc.scene().files[&ids[0]];
    assert_eq!(png.mime_type, "image/png");
    assert_eq!(png.natural_size, Size::new(4.0, 3.0));
    assert!(png.data_url.starts_with("data:image/png;base64,"));
    let svg = &doc.scene().files[&ids[1]];
    assert_eq!(svg.mime_type, "image/svg+xml");
    assert_eq!(svg.natural_size, Size::new(32.0, 16.0));

    // Inline copies are not written back, the references are.
    assert!(doc.work_items(None).is_empty());
    let saved = doc.save().unwrap();
    assert!(saved.contains("[[attachments/photo.png]]"));
    assert!(!saved.contains("data:image/png"));
}

#[test_log::test(tokio::test)]
async fn missing_files_notify_once_and_stop_retrying() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    let (tx, mut rx) = unbounded_channel();
    let ctx = SyncContext::default().with_events(tx);
    let ids = write_embedding_document(&vault, "drawing.md", vec![vault_entry("gone.png")], &ctx);
    let doc = load(&vault, "drawing.md", &ctx);
    let resolver = AssetResolver::new(&ctx, vault_host(&vault, Arc::new(MockRenderer::default())));

    let limit = ctx.config.resolve.missing_asset_retry_limit;
    for _ in 0..limit + 2 {
        let items = doc.work_items(None);
        assert_eq!(resolver.resolve_one(&items[0], doc.path(), Theme::Light).await, None);
    }
    assert_eq!(resolver.registry().missing_count(&ids[0]), limit);
    let notices = drain_notices(&mut rx);
    assert_eq!(
        notices,
        vec![Notice::AssetMissing {
            asset: ids[0].clone(),
            locator: "gone.png".to_string()
        }]
    );
}

#[test_log::test(tokio::test)]
async fn nested_scenes_stop_at_the_depth_ceiling() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    let (tx, mut rx) = unbounded_channel();
    let ctx = SyncContext::default().with_events(tx);
    let max_depth = ctx.config.resolve.max_scene_depth;

    // level0 embeds level1 embeds ... level9.
    for level in 0..9 {
        write_embedding_document(
            &vault,
            &format!("level{level}.md"),
            vec![vault_entry(&format!("level{}.md", level + 1))],
            &ctx,
        );
    }
    write_embedding_document(&vault, "level9.md", Vec::new(), &ctx);
    write_embedding_document(&vault, "top.md", vec![vault_entry("level0.md")], &ctx);

    let renderer = Arc::new(MockRenderer::default());
    let resolver = AssetResolver::new(&ctx, vault_host(&vault, renderer.clone()));
    let mut doc = load(&vault, "top.md", &ctx);
    resolver
        .resolve_document(&mut doc, Theme::Light, &Terminate::new())
        .await;

    assert_eq!(doc.scene().files.len(), 1);
    // Depths 0 through max_depth - 1 render, the next level is refused.
    assert_eq!(renderer.scene_calls(), max_depth);
    let notices = drain_notices(&mut rx);
    assert_eq!(
        notices,
        vec![Notice::RecursionLimit {
            locator: format!("level{max_depth}.md"),
            depth: max_depth
        }]
    );
}

#[test_log::test(tokio::test)]
async fn a_scene_embedding_itself_stops_at_the_depth_ceiling() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    let (tx, mut rx) = unbounded_channel();
    let ctx = SyncContext::default().with_events(tx);
    let max_depth = ctx.config.resolve.max_scene_depth;
    write_embedding_document(&vault, "loop.md", vec![vault_entry("loop.md")], &ctx);
    write_embedding_document(&vault, "top.md", vec![vault_entry("loop.md")], &ctx);

    let renderer = Arc::new(MockRenderer::default());
    let resolver = AssetResolver::new(&ctx, vault_host(&vault, renderer.clone()));
    let mut doc = load(&vault, "top.md", &ctx);
    resolver
        .resolve_document(&mut doc, Theme::Light, &Terminate::new())
        .await;

    assert_eq!(doc.scene().files.len(), 1);
    assert_eq!(renderer.scene_calls(), max_depth);
    assert_eq!(
        drain_notices(&mut rx),
        vec![Notice::RecursionLimit {
            locator: "loop.md".to_string(),
            depth: max_depth
        }]
    );
}

#[test_log::test(tokio::test)]
async fn self_embedding_documents_are_cut_off() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    std::fs::write(vault.join("a.md"), "Alpha embeds ![[b]]\n").unwrap();
    std::fs::write(vault.join("b.md"), "Beta embeds ![[a]] and ![[attachments/photo.png]]\n").unwrap();
    let (tx, mut rx) = unbounded_channel();
    let ctx = SyncContext::default().with_events(tx);
    let ids = write_embedding_document(&vault, "drawing.md", vec![vault_entry("a.md")], &ctx);
    let mut doc = load(&vault, "drawing.md", &ctx);

    let resolver = AssetResolver::new(&ctx, vault_host(&vault, Arc::new(MockRenderer::default())));
    resolver
        .resolve_document(&mut doc, Theme::Light, &Terminate::new())
        .await;

    let rendered = &doc.scene().files[&ids[0]];
    assert_eq!(rendered.mime_type, "image/svg+xml");
    let notices = drain_notices(&mut rx);
    assert_eq!(
        notices,
        vec![Notice::RecursionCycle {
            locator: "a.md".to_string()
        }]
    );
}

#[test_log::test(tokio::test)]
async fn sibling_embeds_of_one_document_both_render() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    std::fs::write(vault.join("shared.md"), "Shared notes with ![[attachments/photo.png]]\n").unwrap();
    let (tx, mut rx) = unbounded_channel();
    let ctx = SyncContext::default().with_events(tx);
    let first = vault_entry("shared.md");
    let second = EmbeddedEntry::Asset(AssetReference::vault_file(
        AssetId::from_source_text("second shared"),
        "shared.md",
    ));
    let ids = write_embedding_document(&vault, "drawing.md", vec![first, second], &ctx);
    let mut doc = load(&vault, "drawing.md", &ctx);

    let resolver = AssetResolver::new(&ctx, vault_host(&vault, Arc::new(MockRenderer::default())));
    resolver
        .resolve_document(&mut doc, Theme::Light, &Terminate::new())
        .await;

    let files = &doc.scene().files;
    assert_eq!(files.len(), 2);
    assert!(ids.iter().all(|id| files[id].mime_type == "image/svg+xml"));
    assert!(drain_notices(&mut rx).is_empty());
}

fn equations(count: usize) -> Vec<WorkItem> {
    (0..count)
        .map(|n| WorkItem::Equation(EquationRef::new(format!("x_{n}^2"))))
        .collect()
}

fn quick_config() -> SyncConfig {
    SyncConfig {
        resolve: ResolveConfig {
            concurrency: 3,
            batch_flush_interval_ms: 5,
            unit_timeout_ms: 1_000,
            ..ResolveConfig::default()
        },
        ..SyncConfig::default()
    }
}

fn memory_host(renderer: Arc<MockRenderer>) -> Host {
    // Formula rendering never touches the vault.
    Host::from_vault(FsVault::new("/nonexistent"), renderer)
}

#[tokio::test(start_paused = true)]
async fn every_item_lands_in_exactly_one_batch() {
    let (tx, mut rx) = unbounded_channel();
    let ctx = SyncContext::new(quick_config()).with_events(tx);
    let renderer = Arc::new(MockRenderer::default());
    let resolver = AssetResolver::new(&ctx, memory_host(renderer.clone()));

    let items = equations(20);
    let expected: HashSet<AssetId> = items.iter().map(|i| i.id().clone()).collect();
    let mut seen = Vec::new();
    let summary = resolver
        .resolve_scene("drawing.md", items, Theme::Light, None, &Terminate::new(), |batch| {
            seen.extend(batch.into_iter().map(|r| {
                assert!(r.asset.is_some());
                r.id
            }));
        })
        .await;

    assert_eq!(seen.len(), 20);
    assert_eq!(seen.iter().cloned().collect::<HashSet<_>>(), expected);
    assert_eq!(summary.completed, 20);
    let mut flushed = 0;
    while let Ok(event) = rx.try_recv() {
        if let SyncEvent::BatchFlushed(n) = event {
            flushed += n;
        }
    }
    assert_eq!(flushed, 20);
}

#[tokio::test(start_paused = true)]
async fn whitelist_limits_the_work() {
    let ctx = SyncContext::new(quick_config());
    let resolver = AssetResolver::new(&ctx, memory_host(Arc::new(MockRenderer::default())));
    let items = equations(5);
    let wanted: HashSet<AssetId> = [items[1].id().clone(), items[3].id().clone()].into();
    let mut seen = HashSet::new();
    resolver
        .resolve_scene("d.md", items, Theme::Light, Some(&wanted), &Terminate::new(), |batch| {
            seen.extend(batch.into_iter().map(|r| r.id));
        })
        .await;
    assert_eq!(seen, wanted);
}

#[tokio::test(start_paused = true)]
async fn hung_renders_are_abandoned_by_the_watchdog() {
    let ctx = SyncContext::new(quick_config());
    let renderer = Arc::new(MockRenderer::slow_on("hang"));
    let resolver = AssetResolver::new(&ctx, memory_host(renderer));
    let mut items = equations(4);
    items.insert(1, WorkItem::Equation(EquationRef::new("\\text{hang}")));

    let mut results = Vec::new();
    let summary = resolver
        .resolve_scene("d.md", items.clone(), Theme::Light, None, &Terminate::new(), |batch| {
            results.extend(batch)
        })
        .await;
    assert_eq!(summary.timed_out, 1);
    assert_eq!(summary.completed, 4);
    assert_eq!(results.len(), 5);
    let hung = results.iter().find(|r| &r.id == items[1].id()).unwrap();
    assert_eq!(hung.asset, None);
    assert_eq!(results.iter().filter(|r| r.asset.is_some()).count(), 4);
}

#[tokio::test]
async fn formulas_render_once_and_follow_the_theme() {
    let ctx = SyncContext::new(quick_config());
    let renderer = Arc::new(MockRenderer::default());
    let resolver = AssetResolver::new(&ctx, memory_host(renderer.clone()));
    let item = WorkItem::Equation(EquationRef::new("e^{i\\pi}"));

    let light = resolver.resolve_one(&item, "a.md", Theme::Light).await.unwrap();
    let again = resolver.resolve_one(&item, "b.md", Theme::Light).await.unwrap();
    assert_eq!(light, again);
    assert_eq!(
        renderer.equation_calls.load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    let dark = resolver.resolve_one(&item, "a.md", Theme::Dark).await.unwrap();
    assert_ne!(light.data_url, dark.data_url);
    assert_eq!(
        renderer.equation_calls.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert!(ctx.registry.equation(item.id()).unwrap().is_loaded);
}

#[test_log::test(tokio::test)]
async fn nested_scene_with_raster_images_carries_a_dark_variant() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    let ctx = SyncContext::default();
    write_embedding_document(&vault, "inner.md", vec![vault_entry("attachments/photo.png")], &ctx);
    let ids = write_embedding_document(&vault, "outer.md", vec![vault_entry("inner.md")], &ctx);

    let renderer = Arc::new(MockRenderer::default());
    let resolver = AssetResolver::new(&ctx, vault_host(&vault, renderer.clone()));
    let mut doc = load(&vault, "outer.md", &ctx);
    resolver
        .resolve_document(&mut doc, Theme::Dark, &Terminate::new())
        .await;

    let inline = &doc.scene().files[&ids[0]];
    let variant = inline.themed_variant.as_ref().unwrap();
    assert_eq!(variant.theme, Theme::Dark);
    assert_ne!(variant.data_url, inline.data_url);
    assert_eq!(inline.data_url_for(Theme::Dark), variant.data_url);
    assert_eq!(renderer.scene_calls(), 2);
}

#[test]
fn entries_without_an_image_are_not_saved() {
    let ctx = SyncContext::default();
    let mut doc = SceneDocument::new("d.md", &ctx);
    let id = doc.add_asset(EmbeddedEntry::Equation(EquationRef::new("a+b")));
    assert!(doc.work_items(None).is_empty());
    assert!(!doc.save().unwrap().contains(id.as_str()));
}
