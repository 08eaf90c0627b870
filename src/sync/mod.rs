//! Keeping a document's text and its embedded scene consistent.
//!
//! [`SceneDocument::load`] reads the text form into a [`Scene`] plus side tables (text bindings,
//! element links, embedded file references), [`SceneDocument::save`] writes them back.
//! The text is authoritative for what the user edits directly: raw text of text elements,
//! element links and embedded file references. The scene is authoritative for everything else.
//!
//! Load order matters. Sections are parsed, the raw scene is normalized, references are
//! repaired and ids stabilized before any text is resolved or any asset is requested, since all
//! of those key on stable ids.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use crate::{
    assets::{
        batch::{ResolvedAsset, WorkItem},
        reference::{
            embedded_line, parse_embedded_line, AssetReference, DiagramRef, EmbeddedEntry,
            EquationRef,
        },
        registry::SharedRegistry,
    },
    config::SyncConfig,
    error::SceneDocError,
    event::EventSender,
    host::Host,
    ids::{AssetId, ElementId},
    scene::{Element, ElementKind, Scene, TextData},
};

pub mod layout;
pub mod normalize;
pub mod sections;
pub mod stabilize;
pub mod text;

use layout::{layout_text, ApproxMeasurer, TextMeasurer};
use normalize::{normalize_raw_scene, repair_references, RepairReport};
use sections::{
    compress_payload, decompress_payload, find_data_section, find_drawing, parse_element_links,
    parse_text_elements, split_data_regions, split_front_matter, DocumentMetadata, DATA_HEADER,
    DOCUMENT_TYPE_KEY, DRAWING_HEADER, ELEMENT_LINKS_HEADER, EMBEDDED_FILES_HEADER,
    TEXT_ELEMENTS_HEADER,
};
use stabilize::{stabilize_ids, IdRewrite};
use text::{ParsedText, TextBinding, TextResolver};

/// Shared state handed to every document and to the asset resolver.
#[derive(Clone)]
pub struct SyncContext {
    pub config: Arc<SyncConfig>,
    pub registry: SharedRegistry,
    pub events: Option<EventSender>,
    pub measurer: Arc<dyn TextMeasurer>,
}

impl SyncContext {
    pub fn new(config: SyncConfig) -> Self {
        SyncContext {
            config: Arc::new(config),
            registry: SharedRegistry::new(),
            events: None,
            measurer: Arc::new(ApproxMeasurer),
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_registry(mut self, registry: SharedRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_measurer(mut self, measurer: Arc<dyn TextMeasurer>) -> Self {
        self.measurer = measurer;
        self
    }
}

impl Default for SyncContext {
    fn default() -> Self {
        SyncContext::new(SyncConfig::default())
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

/// How a load went, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Name of the data section attempt that matched, `None` if the document had no data section.
    pub data_section_attempt: Option<&'static str>,
    pub drawing_attempt: &'static str,
    pub compressed: bool,
    /// Legacy fields filled in on the raw scene.
    pub raw_fields_normalized: usize,
    pub repairs: RepairReport,
    pub rewrites: Vec<IdRewrite>,
    /// Text list entries whose id matched no text element.
    pub orphaned_texts: usize,
}

#[derive(Debug, Clone)]
pub struct SceneDocument {
    path: String,
    metadata: DocumentMetadata,
    free_text: String,
    scene: Scene,
    texts: BTreeMap<ElementId, TextBinding>,
    assets: BTreeMap<AssetId, AssetReference>,
    equations: BTreeMap<AssetId, EquationRef>,
    diagrams: BTreeMap<AssetId, DiagramRef>,
    compress: bool,
    ctx: SyncContext,
    report: LoadReport,
}

fn default_front_matter() -> String {
    format!("---\n{DOCUMENT_TYPE_KEY}: parsed\n---\n")
}

/// Free text always ends on a line break so the data section starts on its own line.
fn normalize_free_text(text: &str) -> String {
    let mut text = text.to_string();
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

fn initial_raw(data: &TextData) -> String {
    let raw = if data.raw_text.is_empty() {
        &data.original_text
    } else {
        &data.raw_text
    };
    raw.trim_end().to_string()
}

impl SceneDocument {
    fn empty(path: &str, ctx: &SyncContext) -> Self {
        SceneDocument {
            path: path.to_string(),
            metadata: DocumentMetadata::parse(&default_front_matter()),
            free_text: String::new(),
            scene: Scene::default(),
            texts: BTreeMap::new(),
            assets: BTreeMap::new(),
            equations: BTreeMap::new(),
            diagrams: BTreeMap::new(),
            compress: ctx.config.document.compress,
            ctx: ctx.clone(),
            report: LoadReport::default(),
        }
    }

    /// A new document holding an empty scene.
    pub fn new(path: &str, ctx: &SyncContext) -> Self {
        SceneDocument::empty(path, ctx)
    }

    /// Parse a document. Fails with [`SceneDocError::NotAScene`] when no scene payload is found.
    #[tracing::instrument(skip_all, fields(path = %path))]
    pub fn load(path: &str, text: &str, ctx: &SyncContext) -> Result<Self, SceneDocError> {
        let (front_matter, rest) = split_front_matter(text);
        let drawing = find_drawing(rest)
            .ok_or_else(|| SceneDocError::NotAScene(format!("{path}: no drawing section")))?;
        let json = if drawing.compressed {
            decompress_payload(&drawing.payload)?
        } else {
            drawing.payload.clone()
        };
        let mut raw: serde_json::Value = serde_json::from_str(&json).map_err(|e| {
            SceneDocError::NotAScene(format!("{path}: drawing is not a scene ({e})"))
        })?;
        let raw_fields_normalized = normalize_raw_scene(&mut raw);
        let scene: Scene = serde_json::from_value(raw)?;

        let mut doc = SceneDocument::empty(path, ctx);
        doc.metadata = DocumentMetadata::parse(front_matter);
        doc.compress = drawing.compressed;
        doc.scene = scene;
        doc.report.drawing_attempt = drawing.attempt;
        doc.report.compressed = drawing.compressed;
        doc.report.raw_fields_normalized = raw_fields_normalized;

        let head = &rest[..drawing.start];
        let body = match find_data_section(head) {
            Some(found) => {
                doc.report.data_section_attempt = Some(found.attempt);
                doc.free_text = normalize_free_text(&head[..found.boundary]);
                &head[found.body_start..]
            }
            None => {
                tracing::debug!("[SceneDocument] {path}: no data section, keeping text as is");
                doc.free_text = normalize_free_text(head);
                ""
            }
        };
        doc.read_data_section(body);

        doc.report.repairs = repair_references(&mut doc.scene);
        doc.stabilize();
        doc.bind_unlisted_texts();
        doc.adopt_registry_references();
        doc.quick_parse_texts();

        tracing::debug!(
            "[SceneDocument] loaded {path}: {} elements, {} texts, {} files, drawing via {}",
            doc.scene.elements.len(),
            doc.texts.len(),
            doc.assets.len() + doc.equations.len() + doc.diagrams.len(),
            drawing.attempt
        );
        Ok(doc)
    }

    /// Import a bare scene, as stored in standalone scene files.
    pub fn from_scene_json(path: &str, json: &str, ctx: &SyncContext) -> Result<Self, SceneDocError> {
        let mut raw: serde_json::Value = serde_json::from_str(json)?;
        let raw_fields_normalized = normalize_raw_scene(&mut raw);
        let mut doc = SceneDocument::empty(path, ctx);
        doc.scene = serde_json::from_value(raw)?;
        doc.report.raw_fields_normalized = raw_fields_normalized;
        doc.report.repairs = repair_references(&mut doc.scene);
        doc.stabilize();
        doc.bind_unlisted_texts();
        doc.quick_parse_texts();
        Ok(doc)
    }

    fn read_data_section(&mut self, body: &str) {
        let regions = split_data_regions(body);
        for (id, raw) in parse_text_elements(regions.text_elements) {
            let id = ElementId::from(id);
            match self.scene.element_mut(&id).and_then(Element::text_mut) {
                Some(data) => {
                    data.raw_text = raw.clone();
                    self.texts.insert(id, TextBinding::new(raw));
                }
                None => {
                    tracing::debug!("[SceneDocument] text entry ^{id} has no text element");
                    self.report.orphaned_texts += 1;
                }
            }
        }
        for (id, link) in regions
            .element_links
            .map(parse_element_links)
            .unwrap_or_default()
        {
            match self.scene.element_mut(&ElementId::from(id.as_str())) {
                Some(element) if !element.is_text() => element.link = Some(link),
                _ => tracing::debug!("[SceneDocument] element link {id} has no element"),
            }
        }
        for line in regions.embedded_files.unwrap_or_default().lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(entry) = parse_embedded_line(line) {
                self.insert_entry(entry);
            }
        }
    }

    fn insert_entry(&mut self, entry: EmbeddedEntry) {
        match entry {
            EmbeddedEntry::Asset(asset) => {
                self.ctx.registry.register_asset(asset.clone());
                self.assets.insert(asset.id.clone(), asset);
            }
            EmbeddedEntry::Equation(eq) => {
                self.ctx.registry.register_equation(eq.clone());
                self.equations.insert(eq.id.clone(), eq);
            }
            EmbeddedEntry::Diagram(diagram) => {
                self.ctx.registry.register_diagram(diagram.clone());
                self.diagrams.insert(diagram.id.clone(), diagram);
            }
        }
    }

    fn stabilize(&mut self) {
        let rewrites = stabilize_ids(&mut self.scene, self.ctx.events.as_ref());
        for rewrite in &rewrites {
            if let Some(binding) = self.texts.remove(&rewrite.from) {
                self.texts.insert(rewrite.to.clone(), binding);
            }
        }
        self.report.rewrites.extend(rewrites);
    }

    /// Text elements missing from the text list get a binding from their own raw text.
    fn bind_unlisted_texts(&mut self) {
        let live: HashSet<ElementId> = self.scene.text_elements().map(|e| e.id.clone()).collect();
        self.texts.retain(|id, _| live.contains(id));
        for element in self.scene.elements.iter_mut().filter(|e| !e.is_deleted) {
            let id = element.id.clone();
            if let Some(data) = element.text_mut() {
                if !self.texts.contains_key(&id) {
                    let raw = initial_raw(data);
                    data.raw_text = raw.clone();
                    self.texts.insert(id, TextBinding::new(raw));
                }
            }
        }
    }

    /// Image elements whose file this document does not list, but another document did.
    fn adopt_registry_references(&mut self) {
        for id in self.scene.referenced_assets() {
            if self.has_reference(&id) {
                continue;
            }
            let registry = &self.ctx.registry;
            let entry = registry
                .asset(&id)
                .map(EmbeddedEntry::Asset)
                .or_else(|| registry.equation(&id).map(EmbeddedEntry::Equation))
                .or_else(|| registry.diagram(&id).map(EmbeddedEntry::Diagram));
            if let Some(entry) = entry {
                tracing::debug!("[SceneDocument] adopting reference {id} from another document");
                self.insert_entry(entry);
            }
        }
    }

    fn has_reference(&self, id: &AssetId) -> bool {
        self.assets.contains_key(id) || self.equations.contains_key(id) || self.diagrams.contains_key(id)
    }

    /// Resolve every binding that needs no I/O and show the result.
    fn quick_parse_texts(&mut self) {
        let resolver = TextResolver::new(&self.ctx.config.links);
        let updates: Vec<(ElementId, ParsedText)> = self
            .texts
            .iter()
            .filter(|(_, b)| b.parsed.is_none())
            .filter_map(|(id, b)| Some((id.clone(), resolver.quick_parse(&b.raw)?)))
            .collect();
        self.apply_parsed(updates);
    }

    /// Serialize. Pure: the same document always produces the same text.
    pub fn save(&self) -> Result<String, SceneDocError> {
        let mut out = String::with_capacity(self.free_text.len() + 1024);
        out.push_str(&self.metadata.raw);
        out.push_str(&normalize_free_text(&self.free_text));
        out.push_str(&format!("%%\n{DATA_HEADER}\n\n{TEXT_ELEMENTS_HEADER}\n"));
        for element in self.scene.text_elements() {
            if let Some(binding) = self.texts.get(&element.id) {
                out.push_str(&format!("{} ^{}\n\n", binding.raw, element.id));
            }
        }

        let links: Vec<String> = self
            .scene
            .live_elements()
            .filter(|e| !e.is_text())
            .filter_map(|e| Some(format!("{}: {}\n", e.id, e.link.as_ref()?)))
            .collect();
        if !links.is_empty() {
            out.push_str(&format!("{ELEMENT_LINKS_HEADER}\n"));
            links.iter().for_each(|l| out.push_str(l));
            out.push('\n');
        }

        let referenced = self.scene.referenced_assets();
        let files: Vec<String> = referenced
            .iter()
            .filter_map(|id| self.entry(id))
            .map(|entry| format!("{}\n", embedded_line(&entry)))
            .collect();
        if !files.is_empty() {
            out.push_str(&format!("{EMBEDDED_FILES_HEADER}\n"));
            files.iter().for_each(|l| out.push_str(l));
            out.push('\n');
        }

        let mut scene = self.scene.clone();
        scene.files.retain(|id, _| !self.has_reference(id));
        out.push_str(&format!("{DRAWING_HEADER}\n"));
        if self.compress {
            let json = serde_json::to_string(&scene)?;
            out.push_str(&format!(
                "```compressed-json\n{}\n```\n%%",
                compress_payload(&json, self.ctx.config.document.compressed_line_width)?
            ));
        } else {
            out.push_str(&format!(
                "```json\n{}\n```\n%%",
                serde_json::to_string_pretty(&scene)?
            ));
        }
        Ok(out)
    }

    fn entry(&self, id: &AssetId) -> Option<EmbeddedEntry> {
        if let Some(asset) = self.assets.get(id) {
            return Some(EmbeddedEntry::Asset(asset.clone()));
        }
        if let Some(eq) = self.equations.get(id) {
            return Some(EmbeddedEntry::Equation(eq.clone()));
        }
        self.diagrams.get(id).cloned().map(EmbeddedEntry::Diagram)
    }

    /// Take back a scene edited on the drawing surface.
    ///
    /// Raw text the surface changed replaces the binding, bindings and references whose
    /// elements are gone are dropped, and new foreign ids are stabilized.
    pub fn sync_from_scene(&mut self, scene: Scene) -> Vec<IdRewrite> {
        let before = self.report.rewrites.len();
        self.scene = scene;
        self.report.repairs = repair_references(&mut self.scene);
        self.stabilize();

        for element in self.scene.text_elements() {
            let Some(data) = element.text() else { continue };
            match self.texts.get_mut(&element.id) {
                Some(binding) => {
                    if !data.raw_text.is_empty() && binding.set_raw(&data.raw_text) {
                        tracing::debug!("[SceneDocument] raw text of {} changed", element.id);
                    }
                }
                None => {
                    self.texts
                        .insert(element.id.clone(), TextBinding::new(initial_raw(data)));
                }
            }
        }
        self.bind_unlisted_texts();

        let referenced: HashSet<AssetId> = self.scene.referenced_assets().into_iter().collect();
        self.assets.retain(|id, _| referenced.contains(id));
        self.equations.retain(|id, _| referenced.contains(id));
        self.diagrams.retain(|id, _| referenced.contains(id));
        self.adopt_registry_references();
        self.quick_parse_texts();
        self.report.rewrites[before..].to_vec()
    }

    /// Change a text element's raw markup. Returns whether the element exists.
    pub fn set_text(&mut self, id: &ElementId, raw: &str) -> bool {
        let Some(data) = self.scene.element_mut(id).and_then(Element::text_mut) else {
            return false;
        };
        data.raw_text = raw.to_string();
        let binding = self.texts.entry(id.clone()).or_default();
        if binding.set_raw(raw) {
            self.quick_parse_texts();
        }
        true
    }

    /// Resolve bindings that need other documents, then show the results.
    #[tracing::instrument(skip_all, fields(path = %self.path))]
    pub async fn resolve_texts(&mut self, host: &Host) -> usize {
        let resolver = TextResolver::new(&self.ctx.config.links);
        let mut updates = Vec::new();
        for (id, binding) in self.texts.iter().filter(|(_, b)| b.parsed.is_none()) {
            let parsed = resolver
                .parse(&binding.raw, &self.path, host.paths.as_ref(), host.documents.as_ref())
                .await;
            updates.push((id.clone(), parsed));
        }
        let count = updates.len();
        self.apply_parsed(updates);
        count
    }

    /// Show resolved text. Builds a new element list and swaps it in.
    pub fn apply_parsed(&mut self, updates: Vec<(ElementId, ParsedText)>) {
        if updates.is_empty() {
            return;
        }
        let current = &self.scene.elements;
        let by_id: HashMap<&ElementId, &Element> = current.iter().map(|e| (&e.id, e)).collect();
        let mut changed: HashMap<ElementId, Element> = HashMap::new();
        let mut grown: HashMap<ElementId, f64> = HashMap::new();

        for (id, parsed) in &updates {
            let Some(element) = by_id.get(id) else { continue };
            let Some(data) = element.text() else { continue };
            let container = data.container_id.as_ref().and_then(|c| by_id.get(c)).copied();
            let Some(layout) = layout_text(element, container, &parsed.text, self.ctx.measurer.as_ref())
            else {
                continue;
            };
            let mut next = (*element).clone();
            next.x = layout.x;
            next.y = layout.y;
            next.width = layout.width;
            next.height = layout.height;
            next.link = parsed.link.clone();
            if let ElementKind::Text(text) = &mut next.kind {
                text.text = layout.text;
                text.original_text = parsed.text.clone();
            }
            if let (Some(container), Some(height)) = (container, layout.container_height) {
                grown.insert(container.id.clone(), height);
            }
            changed.insert(id.clone(), next);
        }

        let elements: Vec<Element> = current
            .iter()
            .map(|e| {
                let mut next = changed.remove(&e.id).unwrap_or_else(|| e.clone());
                if let Some(height) = grown.get(&e.id) {
                    next.height = *height;
                }
                next
            })
            .collect();
        self.scene.elements = elements;
        for (id, parsed) in updates {
            if let Some(binding) = self.texts.get_mut(&id) {
                binding.parsed = Some(parsed.text);
            }
        }
    }

    /// Work needed to show every image of the scene. Without a whitelist, files already present
    /// are skipped; with one, exactly the listed ids are returned when they have a reference.
    pub fn work_items(&self, whitelist: Option<&HashSet<AssetId>>) -> Vec<WorkItem> {
        self.scene
            .referenced_assets()
            .into_iter()
            .filter(|id| match whitelist {
                Some(ids) => ids.contains(id),
                None => !self.scene.files.contains_key(id),
            })
            .filter_map(|id| match self.entry(&id)? {
                EmbeddedEntry::Asset(asset) => Some(WorkItem::Asset(asset)),
                EmbeddedEntry::Equation(eq) => Some(WorkItem::Equation(eq)),
                EmbeddedEntry::Diagram(diagram) => Some(WorkItem::Diagram(diagram)),
            })
            .collect()
    }

    /// Put resolved assets into the scene's `files`. Returns how many were stored.
    pub fn apply_resolved(&mut self, batch: Vec<ResolvedAsset>) -> usize {
        let mut stored = 0;
        for resolved in batch {
            if let Some(asset) = resolved.asset {
                self.scene.files.insert(resolved.id, asset);
                stored += 1;
            }
        }
        stored
    }

    /// Add a reference for an image element to point at.
    pub fn add_asset(&mut self, entry: EmbeddedEntry) -> AssetId {
        let id = entry.id().clone();
        self.insert_entry(entry);
        id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn free_text(&self) -> &str {
        &self.free_text
    }

    pub fn set_free_text(&mut self, text: &str) {
        self.free_text = normalize_free_text(text);
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn texts(&self) -> &BTreeMap<ElementId, TextBinding> {
        &self.texts
    }

    pub fn text(&self, id: &ElementId) -> Option<&TextBinding> {
        self.texts.get(id)
    }

    pub fn assets(&self) -> &BTreeMap<AssetId, AssetReference> {
        &self.assets
    }

    pub fn equations(&self) -> &BTreeMap<AssetId, EquationRef> {
        &self.equations
    }

    pub fn diagrams(&self) -> &BTreeMap<AssetId, DiagramRef> {
        &self.diagrams
    }

    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    pub fn set_compressed(&mut self, compress: bool) {
        self.compress = compress;
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }
}
