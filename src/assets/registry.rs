use parking_lot::{Mutex, RwLock};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    assets::reference::{AssetReference, DiagramRef, EquationRef},
    event::Notice,
    ids::AssetId,
    scene::{InlineAsset, Theme},
};

/// Lookups shared by every document of one running instance.
///
/// Holds the formula, diagram and asset references seen so far (so a pasted element finds its
/// source in another document), renders of formulas and diagrams (so identical sources render
/// once), the set of notices already shown and per-reference missing-file counters.
///
/// Cloning is cheap and every clone sees the same state. Construct one per running instance and
/// hand it to both engines.
#[derive(Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    equations: RwLock<HashMap<AssetId, EquationRef>>,
    diagrams: RwLock<HashMap<AssetId, DiagramRef>>,
    assets: RwLock<HashMap<AssetId, AssetReference>>,
    renders: RwLock<HashMap<(AssetId, Theme), InlineAsset>>,
    notified: Mutex<HashSet<String>>,
    missing: Mutex<HashMap<AssetId, u32>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        SharedRegistry::default()
    }

    pub fn register_equation(&self, equation: EquationRef) {
        self.inner
            .equations
            .write()
            .entry(equation.id.clone())
            .or_insert(equation);
    }

    pub fn equation(&self, id: &AssetId) -> Option<EquationRef> {
        self.inner.equations.read().get(id).cloned()
    }

    pub fn register_diagram(&self, diagram: DiagramRef) {
        self.inner
            .diagrams
            .write()
            .entry(diagram.id.clone())
            .or_insert(diagram);
    }

    pub fn diagram(&self, id: &AssetId) -> Option<DiagramRef> {
        self.inner.diagrams.read().get(id).cloned()
    }

    pub fn register_asset(&self, asset: AssetReference) {
        self.inner.assets.write().insert(asset.id.clone(), asset);
    }

    pub fn asset(&self, id: &AssetId) -> Option<AssetReference> {
        self.inner.assets.read().get(id).cloned()
    }

    pub fn rendered(&self, id: &AssetId, theme: Theme) -> Option<InlineAsset> {
        self.inner.renders.read().get(&(id.clone(), theme)).cloned()
    }

    /// Remember a formula or diagram render and mark its reference loaded.
    pub fn store_render(&self, id: &AssetId, theme: Theme, asset: InlineAsset) {
        self.inner
            .renders
            .write()
            .insert((id.clone(), theme), asset);
        if let Some(eq) = self.inner.equations.write().get_mut(id) {
            eq.is_loaded = true;
        }
        if let Some(diagram) = self.inner.diagrams.write().get_mut(id) {
            diagram.is_loaded = true;
        }
    }

    /// True the first time a notice is seen, false for every repeat.
    pub fn first_notice(&self, notice: &Notice) -> bool {
        let key = match notice {
            Notice::AssetMissing { asset, .. } => format!("missing:{asset}"),
            Notice::RecursionLimit { locator, .. } => format!("depth:{locator}"),
            Notice::RecursionCycle { locator } => format!("cycle:{locator}"),
            Notice::RenderFailed { locator, .. } => format!("render:{locator}"),
        };
        self.inner.notified.lock().insert(key)
    }

    /// Count one more failed lookup of `id`. Returns the new count.
    pub fn record_missing(&self, id: &AssetId) -> u32 {
        let mut missing = self.inner.missing.lock();
        let count = missing.entry(id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn missing_count(&self, id: &AssetId) -> u32 {
        self.inner.missing.lock().get(id).copied().unwrap_or(0)
    }

    pub fn clear_missing(&self, id: &AssetId) {
        self.inner.missing.lock().remove(id);
    }
}

impl std::fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegistry")
            .field("equations", &self.inner.equations.read().len())
            .field("diagrams", &self.inner.diagrams.read().len())
            .field("assets", &self.inner.assets.read().len())
            .finish_non_exhaustive()
    }
}
