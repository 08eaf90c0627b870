//! # scenedoc-core
//!
//! Bidirectional synchronization between plain-text documents and the drawing scenes embedded in
//! them, plus cached resolution of everything those scenes embed.
//!
//! ## Overview
//!
//! A scene document is a Markdown file whose tail holds a hidden data section:
//!
//! ````text
//! ---
//! excalidraw-plugin: parsed
//! ---
//! Free text the user wrote.
//! %%
//! # Excalidraw Data
//!
//! ## Text Elements
//! Hello [[Other Note]] ^k3Jd9aQx
//!
//! ## Embedded Files
//! 3f2a...: [[attachments/photo.png]]
//!
//! ## Drawing
//! ```json
//! {"type": "excalidraw", "elements": [...], "files": {}}
//! ```
//! %%
//! ````
//!
//! The text side is authoritative for the raw markup of text elements, element links and file
//! references; the scene is authoritative for geometry and everything else.
//!
//! ## Architecture
//!
//! - **[`sync`]**: [`sync::SceneDocument`] load/save, id stabilization, reference repair, text
//!   resolution and layout
//! - **[`assets`]**: [`assets::AssetResolver`], which turns file references, formulas and
//!   diagrams into inline images under bounded concurrency ([`pool`])
//! - **[`cache`]**: [`cache::ContentCache`], a sqlite store of renders invalidated through the
//!   embed dependency graph, and of document backups
//! - **[`host`]**: the traits through which the engines reach files, documents and renderers
//! - **[`event`]**: notices and sync events streamed to the application
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scenedoc_core::{
//!     assets::AssetResolver,
//!     host::{FsVault, Host, NoRenderer},
//!     pool::Terminate,
//!     scene::Theme,
//!     sync::{SceneDocument, SyncContext},
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = SyncContext::default();
//!     let text = std::fs::read_to_string("./vault/drawing.md")?;
//!     let mut doc = SceneDocument::load("drawing.md", &text, &ctx)?;
//!
//!     let host = Host::from_vault(FsVault::new("./vault"), Arc::new(NoRenderer));
//!     doc.resolve_texts(&host).await;
//!     let resolver = AssetResolver::new(&ctx, host);
//!     resolver
//!         .resolve_document(&mut doc, Theme::Light, &Terminate::new())
//!         .await;
//!
//!     std::fs::write("./vault/drawing.md", doc.save()?)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **default**: the library
//! - **bin**: the `scenedoc` command line tool

pub mod assets;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod host;
pub mod ids;
pub mod link;
pub mod pool;
pub mod scene;
pub mod sync;

pub use error::*;
