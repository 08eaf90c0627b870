//! Durable cache of resolved asset renders and document backups.
//!
//! Renders are keyed by [`CacheKey`] and invalidated when the source file or anything it
//! embeds changes. See [`store::ContentCache`].

pub mod deps;
pub mod key;
pub mod store;

pub use deps::EmbedGraph;
pub use key::{CacheKey, OutputKind, Subpart, CACHE_KEY_VERSION};
pub use store::{
    CachedRender, ContentCache, MaintenanceReport, RenderPayload, CONTENT_CACHE_DB,
};
