//! scenedoc CLI tool
//!
//! Inspect, normalize and resolve scene documents from the command line.
//!
//! ## Commands
//!
//! - `inspect <file>`: Load a document and print what was found
//! - `normalize <file>`: Load and save, printing the result or writing it back with `--write`
//! - `resolve <file> --vault <dir>`: Resolve text transclusions and embedded images against a
//!   vault directory, optionally through the content cache
//!
//! Documents are only modified with `--write`. Writes go to a temporary file that is then
//! renamed over the original.

use clap::{Parser, Subcommand, ValueEnum};
use scenedoc_core::{
    assets::AssetResolver,
    cache::{ContentCache, CONTENT_CACHE_DB},
    config::{load_config, SyncConfig},
    event::SyncEvent,
    host::{FileProvider, FsVault, Host, NoRenderer},
    pool::Terminate,
    scene::Theme,
    sync::{SceneDocument, SyncContext},
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

#[derive(Parser)]
#[command(name = "scenedoc")]
#[command(author, version, about = "A tool for inspecting and syncing scene documents", long_about = None)]
struct Cli {
    /// TOML configuration file. Missing files mean defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ThemeArg {
    Light,
    Dark,
}

impl From<ThemeArg> for Theme {
    fn from(value: ThemeArg) -> Self {
        match value {
            ThemeArg::Light => Theme::Light,
            ThemeArg::Dark => Theme::Dark,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load a document and report its sections, texts and references
    Inspect {
        /// Path to the document
        file: PathBuf,
    },

    /// Load and save a document, normalizing its data section
    Normalize {
        /// Path to the document
        file: PathBuf,

        /// Write the result back instead of printing it
        #[arg(short, long)]
        write: bool,

        /// Store the drawing compressed
        #[arg(long, conflicts_with = "no_compress")]
        compress: bool,

        /// Store the drawing as plain JSON
        #[arg(long)]
        no_compress: bool,
    },

    /// Resolve transclusions and embedded images against a vault
    Resolve {
        /// Path to the document, inside the vault
        file: PathBuf,

        /// Vault root
        #[arg(long)]
        vault: PathBuf,

        /// Use the content cache in the vault
        #[arg(long)]
        cache: bool,

        /// Theme to render for
        #[arg(long, value_enum, default_value = "light")]
        theme: ThemeArg,

        /// Write the result back
        #[arg(short, long)]
        write: bool,
    },
}

fn read_config(path: Option<&Path>) -> Result<SyncConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => load_config(path)?,
        None => SyncConfig::default(),
    })
}

fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("md.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

fn print_events(rx: &mut UnboundedReceiver<SyncEvent>) {
    while let Ok(event) = rx.try_recv() {
        match event {
            SyncEvent::Notice(notice) => eprintln!("! {notice}"),
            other => tracing::debug!("[scenedoc] {other}"),
        }
    }
}

fn inspect(doc: &SceneDocument) {
    let report = doc.report();
    println!("Document: {}", doc.path());
    println!(
        "Drawing: {} ({})",
        report.drawing_attempt,
        if report.compressed { "compressed" } else { "plain" }
    );
    match report.data_section_attempt {
        Some(attempt) => println!("Data section: {attempt}"),
        None => println!("Data section: none"),
    }
    println!("Elements: {}", doc.scene().elements.len());
    println!("Text elements: {}", doc.texts().len());
    println!(
        "References: {} files, {} formulas, {} diagrams",
        doc.assets().len(),
        doc.equations().len(),
        doc.diagrams().len()
    );
    println!("Legacy fields normalized: {}", report.raw_fields_normalized);
    if !report.repairs.is_empty() {
        println!("Repairs: {:?}", report.repairs);
    }
    for rewrite in &report.rewrites {
        println!("Id rewritten: {} -> {}", rewrite.from, rewrite.to);
    }
    if report.orphaned_texts > 0 {
        println!("Orphaned text entries: {}", report.orphaned_texts);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = read_config(cli.config.as_deref())?;
    let (tx, mut rx) = unbounded_channel();
    let ctx = SyncContext::new(config).with_events(tx);

    match cli.command {
        Commands::Inspect { file } => {
            let text = std::fs::read_to_string(&file)?;
            let doc = SceneDocument::load(&file.to_string_lossy(), &text, &ctx)?;
            inspect(&doc);
        }
        Commands::Normalize {
            file,
            write,
            compress,
            no_compress,
        } => {
            let text = std::fs::read_to_string(&file)?;
            let mut doc = SceneDocument::load(&file.to_string_lossy(), &text, &ctx)?;
            if compress {
                doc.set_compressed(true);
            } else if no_compress {
                doc.set_compressed(false);
            }
            let saved = doc.save()?;
            if write {
                if saved != text {
                    write_atomic(&file, &saved)?;
                    println!("Written: {}", file.display());
                } else {
                    println!("Unchanged: {}", file.display());
                }
            } else {
                print!("{saved}");
            }
        }
        Commands::Resolve {
            file,
            vault,
            cache,
            theme,
            write,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async {
                let fs_vault = FsVault::new(&vault);
                let full = if file.is_absolute() {
                    file.clone()
                } else {
                    vault.join(&file)
                };
                let doc_path = fs_vault
                    .vault_path(&full)
                    .ok_or_else(|| format!("{} is not inside {}", file.display(), vault.display()))?;
                let host = Host::from_vault(fs_vault, Arc::new(NoRenderer));

                let content_cache = if cache {
                    let db_path = match &ctx.config.cache.path {
                        Some(path) => path.clone(),
                        None => vault.join(".scenedoc").join(CONTENT_CACHE_DB),
                    };
                    if let Some(parent) = db_path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    let opened = ContentCache::open(&db_path, &ctx.config.cache).await?;
                    if let Some(report) = opened.maintain(host.files.as_ref()).await? {
                        tracing::info!("[scenedoc] cache maintenance: {report:?}");
                    }
                    opened
                } else {
                    ContentCache::disabled()
                };

                let text = std::fs::read_to_string(&full)?;
                let mut doc = SceneDocument::load(&doc_path, &text, &ctx)?;
                let transcluded = doc.resolve_texts(&host).await;

                let files = host.files.clone();
                let resolver = AssetResolver::new(&ctx, host).with_cache(content_cache.clone());
                let summary = resolver
                    .resolve_document(&mut doc, theme.into(), &Terminate::new())
                    .await;
                print_events(&mut rx);
                println!(
                    "Resolved {transcluded} texts, {} images ({} timed out) in {} batches",
                    summary.completed, summary.timed_out, summary.batches
                );

                if write {
                    let mtime = files.stat(&doc_path).await?.mtime_ms;
                    content_cache.backup_document(&doc_path, &text, mtime).await?;
                    write_atomic(&full, &doc.save()?)?;
                    println!("Written: {}", full.display());
                }
                Ok::<(), Box<dyn std::error::Error>>(())
            })?;
        }
    }
    print_events(&mut rx);
    Ok(())
}
