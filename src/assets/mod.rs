//! Embedded file references and the engine that turns them into inline images.

pub mod batch;
pub mod markdown;
pub mod nested;
pub mod pdf;
pub mod reference;
pub mod registry;
pub mod resolver;
pub mod svg;

pub use batch::{ResolvedAsset, WorkItem};
pub use reference::{AssetKind, AssetReference, DiagramRef, EmbeddedEntry, EquationRef};
pub use registry::SharedRegistry;
pub use resolver::AssetResolver;
