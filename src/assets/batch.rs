//! Resolving all images of a scene under bounded concurrency.

use std::collections::HashSet;

use crate::{
    assets::{
        reference::{AssetReference, DiagramRef, EquationRef},
        resolver::AssetResolver,
    },
    event::{emit, SyncEvent},
    ids::AssetId,
    pool::{ConcurrencyPool, PoolSummary, Terminate, UnitOutcome},
    scene::{InlineAsset, Theme},
    sync::SceneDocument,
};

/// One image to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    Asset(AssetReference),
    Equation(EquationRef),
    Diagram(DiagramRef),
}

impl WorkItem {
    pub fn id(&self) -> &AssetId {
        match self {
            WorkItem::Asset(asset) => &asset.id,
            WorkItem::Equation(eq) => &eq.id,
            WorkItem::Diagram(diagram) => &diagram.id,
        }
    }

    /// What to show the user when this item fails.
    pub fn locator(&self) -> &str {
        match self {
            WorkItem::Asset(asset) => &asset.locator,
            WorkItem::Equation(eq) => &eq.source_text,
            WorkItem::Diagram(diagram) => &diagram.source_text,
        }
    }
}

/// Result for one item. `asset` is `None` when it could not be produced; the element keeps
/// whatever it showed before.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAsset {
    pub id: AssetId,
    pub asset: Option<InlineAsset>,
}

impl AssetResolver {
    /// Resolve `items` for the scene at `source`, handing results over in batches as they
    /// complete. With a whitelist only the listed ids are processed.
    ///
    /// Every processed item is reported in exactly one batch unless `terminate` was set before
    /// it started.
    #[tracing::instrument(skip_all, fields(source = %source, items = items.len()))]
    pub async fn resolve_scene<B>(
        &self,
        source: &str,
        items: Vec<WorkItem>,
        theme: Theme,
        whitelist: Option<&HashSet<AssetId>>,
        terminate: &Terminate,
        mut on_batch: B,
    ) -> PoolSummary
    where
        B: FnMut(Vec<ResolvedAsset>),
    {
        let items: Vec<WorkItem> = items
            .into_iter()
            .filter(|item| whitelist.is_none_or(|ids| ids.contains(item.id())))
            .collect();
        let resolve = &self.config().resolve;
        let pool = ConcurrencyPool::new(resolve.concurrency, resolve.flush_interval())
            .with_unit_timeout(resolve.unit_timeout());
        let units: Vec<_> = items
            .iter()
            .map(|item| move || self.resolve_one(item, source, theme))
            .collect();

        let summary = pool
            .run(units, terminate, |batch| {
                let resolved: Vec<ResolvedAsset> = batch
                    .into_iter()
                    .filter_map(|(index, outcome)| {
                        let id = items[index].id().clone();
                        match outcome {
                            UnitOutcome::Done(asset) => Some(ResolvedAsset { id, asset }),
                            UnitOutcome::TimedOut => {
                                tracing::warn!(
                                    "[AssetResolver] {} timed out",
                                    items[index].locator()
                                );
                                Some(ResolvedAsset { id, asset: None })
                            }
                            UnitOutcome::Skipped => None,
                        }
                    })
                    .collect();
                if resolved.is_empty() {
                    return;
                }
                emit(self.events(), SyncEvent::BatchFlushed(resolved.len()));
                on_batch(resolved);
            })
            .await;
        tracing::debug!(
            "[AssetResolver] {source}: {} done, {} timed out, {} skipped in {} batches",
            summary.completed,
            summary.timed_out,
            summary.skipped,
            summary.batches
        );
        summary
    }

    /// Resolve every image `doc` is missing and store the results in its scene.
    pub async fn resolve_document(
        &self,
        doc: &mut SceneDocument,
        theme: Theme,
        terminate: &Terminate,
    ) -> PoolSummary {
        let source = doc.path().to_string();
        let items = doc.work_items(None);
        self.resolve_scene(&source, items, theme, None, terminate, |batch| {
            doc.apply_resolved(batch);
        })
        .await
    }
}
