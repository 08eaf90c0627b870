use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use sqlx::{
    error::BoxDynError,
    migrate::{
        MigrateDatabase, Migration as SqlxMigration, MigrationSource, MigrationType, Migrator,
    },
    pool::PoolOptions,
    sqlite::{Sqlite, SqliteConnectOptions},
    ConnectOptions, Pool,
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle, time::timeout};

use crate::{
    cache::{
        deps::{dependency_hash, EmbedGraph},
        key::{is_current, CacheKey, OutputKind},
    },
    config::CacheConfig,
    error::SceneDocError,
    host::FileProvider,
    scene::{data_url, now_ms, InlineAsset, Size},
};

pub const CONTENT_CACHE_DB: &str = "scenedoc_cache.db";

/// What a render produced. Vector output is stored as markup, raster output as a blob.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderPayload {
    Vector(String),
    Raster(Vec<u8>),
}

impl RenderPayload {
    pub fn is_empty(&self) -> bool {
        match self {
            RenderPayload::Vector(svg) => svg.trim().is_empty(),
            RenderPayload::Raster(bytes) => bytes.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedRender {
    pub output: OutputKind,
    /// Source modification time the render was made from.
    pub mtime: i64,
    pub size: Size,
    pub data_url: Arc<str>,
}

impl CachedRender {
    pub fn to_inline_asset(&self) -> InlineAsset {
        InlineAsset {
            mime_type: self.output.mime_type().to_string(),
            data_url: self.data_url.to_string(),
            created_at: now_ms(),
            natural_size: self.size,
            themed_variant: None,
        }
    }
}

/// Rows removed by one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub stale_version: usize,
    pub source_missing: usize,
    pub source_newer: usize,
    pub empty: usize,
    pub backups_removed: usize,
}

impl MaintenanceReport {
    pub fn renders_removed(&self) -> usize {
        self.stale_version + self.source_missing + self.source_newer + self.empty
    }
}

/// Durable store for renders and document backups.
///
/// Every lookup is best effort: a cache that is disabled, still opening, or failing reports a
/// miss and the caller resolves directly. Cloning shares the same handle.
#[derive(Clone)]
pub struct ContentCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    enabled: bool,
    ready_timeout: Duration,
    maintenance_delay: Duration,
    pool: watch::Receiver<Option<Pool<Sqlite>>>,
    embeds: RwLock<EmbedGraph>,
    /// Data URLs already materialized this session, keyed by encoded key, tagged with mtime.
    handles: Mutex<HashMap<String, (i64, Arc<str>)>>,
    maintained: AtomicBool,
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("enabled", &self.inner.enabled)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl ContentCache {
    fn with_receiver(config: &CacheConfig, pool: watch::Receiver<Option<Pool<Sqlite>>>) -> Self {
        ContentCache {
            inner: Arc::new(CacheInner {
                enabled: config.enabled,
                ready_timeout: Duration::from_millis(config.ready_timeout_ms),
                maintenance_delay: Duration::from_secs(config.maintenance_delay_secs),
                pool,
                embeds: RwLock::new(EmbedGraph::new()),
                handles: Mutex::new(HashMap::new()),
                maintained: AtomicBool::new(false),
            }),
        }
    }

    /// A cache that is never ready. Every lookup misses.
    pub fn disabled() -> Self {
        let (_tx, rx) = watch::channel(None);
        ContentCache::with_receiver(
            &CacheConfig {
                enabled: false,
                ..CacheConfig::default()
            },
            rx,
        )
    }

    /// Open the store at `path` and wait for it.
    pub async fn open(path: &Path, config: &CacheConfig) -> Result<Self, SceneDocError> {
        if !config.enabled {
            return Ok(ContentCache::disabled());
        }
        let pool = cache_db_init(path.to_path_buf()).await?;
        let (_tx, rx) = watch::channel(Some(pool));
        Ok(ContentCache::with_receiver(config, rx))
    }

    /// Start opening the store at `path` and return at once. Lookups made before the store is
    /// open wait up to `ready_timeout_ms` and then miss.
    pub fn open_in_background(path: PathBuf, config: &CacheConfig) -> Self {
        let (tx, rx) = watch::channel(None);
        let cache = ContentCache::with_receiver(config, rx);
        if config.enabled {
            tokio::spawn(async move {
                match cache_db_init(path.clone()).await {
                    Ok(pool) => {
                        let _ = tx.send(Some(pool));
                    }
                    Err(e) => {
                        tracing::warn!("[ContentCache] could not open {path:?}: {e}. Caching disabled.");
                    }
                }
            });
        }
        cache
    }

    pub fn is_ready(&self) -> bool {
        self.inner.enabled && self.inner.pool.borrow().is_some()
    }

    async fn pool(&self) -> Option<Pool<Sqlite>> {
        if !self.inner.enabled {
            return None;
        }
        let mut rx = self.inner.pool.clone();
        if let Some(pool) = rx.borrow().clone() {
            return Some(pool);
        }
        let pool = match timeout(self.inner.ready_timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(pool)) => pool.clone(),
            _ => {
                tracing::debug!("[ContentCache] not ready, treating lookup as a miss");
                None
            }
        };
        pool
    }

    /// Record that `source` embeds `target`, for dependency invalidation.
    pub fn record_embed(&self, source: &str, target: &str) {
        self.inner.embeds.write().record_embed(source, target);
    }

    pub fn clear_embeds(&self, source: &str) {
        self.inner.embeds.write().clear_embeds(source);
    }

    async fn current_dep_hash(&self, locator: &str, files: &dyn FileProvider) -> String {
        let deps = self.inner.embeds.read().dependencies(locator);
        dependency_hash(&deps, files).await
    }

    /// A render for `key`, valid only while its source and everything the source embeds are
    /// unchanged.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn get(&self, key: &CacheKey, files: &dyn FileProvider) -> Option<CachedRender> {
        let pool = self.pool().await?;
        let encoded = key.encode();
        let row = sqlx::query_as::<_, (i64, String, String, Option<String>, Option<Vec<u8>>, f64, f64)>(
            "SELECT mtime, dep_hash, kind, svg, blob, width, height FROM renders WHERE key = ?",
        )
        .bind(&encoded)
        .fetch_optional(&pool)
        .await
        .map_err(|e| tracing::warn!("[ContentCache] lookup failed: {e}"))
        .ok()??;
        let (mtime, dep_hash, kind, svg, blob, width, height) = row;

        let source_mtime = files.stat(&key.locator).await.ok()?.mtime_ms;
        if source_mtime > mtime {
            tracing::debug!("[ContentCache] {} changed since render", key.locator);
            return None;
        }
        if self.current_dep_hash(&key.locator, files).await != dep_hash {
            tracing::debug!("[ContentCache] a dependency of {} changed", key.locator);
            return None;
        }
        let output = OutputKind::try_from(kind.as_str()).ok()?;

        if let Some((cached_mtime, url)) = self.inner.handles.lock().get(&encoded) {
            if *cached_mtime == mtime {
                return Some(CachedRender {
                    output,
                    mtime,
                    size: Size::new(width, height),
                    data_url: url.clone(),
                });
            }
        }
        let url: Arc<str> = match (svg, blob) {
            (Some(svg), _) if output.is_vector() => data_url(output.mime_type(), svg.as_bytes()),
            (_, Some(blob)) => data_url(output.mime_type(), &blob),
            _ => return None,
        }
        .into();
        self.inner
            .handles
            .lock()
            .insert(encoded, (mtime, url.clone()));
        Some(CachedRender {
            output,
            mtime,
            size: Size::new(width, height),
            data_url: url,
        })
    }

    /// Store a render of `key`, stamped with the source's current modification time and
    /// dependency hash. Empty payloads are not stored.
    pub async fn put(
        &self,
        key: &CacheKey,
        payload: &RenderPayload,
        size: Size,
        files: &dyn FileProvider,
    ) -> Result<(), SceneDocError> {
        let Some(pool) = self.pool().await else {
            return Ok(());
        };
        if payload.is_empty() {
            return Ok(());
        }
        let mtime = files.stat(&key.locator).await?.mtime_ms;
        let dep_hash = self.current_dep_hash(&key.locator, files).await;
        let (svg, blob) = match payload {
            RenderPayload::Vector(svg) => (Some(svg.as_str()), None),
            RenderPayload::Raster(bytes) => (None, Some(bytes.as_slice())),
        };
        let encoded = key.encode();
        sqlx::query(
            "INSERT OR REPLACE INTO renders \
             (key, locator, mtime, dep_hash, kind, svg, blob, width, height, created) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&encoded)
        .bind(&key.locator)
        .bind(mtime)
        .bind(dep_hash)
        .bind(key.output.as_str())
        .bind(svg)
        .bind(blob)
        .bind(size.width)
        .bind(size.height)
        .bind(now_ms())
        .execute(&pool)
        .await?;
        self.inner.handles.lock().remove(&encoded);
        tracing::debug!("[ContentCache] stored {encoded}");
        Ok(())
    }

    pub async fn backup_document(
        &self,
        path: &str,
        content: &str,
        mtime: i64,
    ) -> Result<(), SceneDocError> {
        let Some(pool) = self.pool().await else {
            return Ok(());
        };
        sqlx::query("INSERT OR REPLACE INTO backups (path, content, mtime) VALUES (?, ?, ?)")
            .bind(path)
            .bind(content)
            .bind(mtime)
            .execute(&pool)
            .await?;
        Ok(())
    }

    /// Last known good text of `path`.
    pub async fn get_backup(&self, path: &str) -> Option<String> {
        let pool = self.pool().await?;
        sqlx::query_as::<_, (String,)>("SELECT content FROM backups WHERE path = ?")
            .bind(path)
            .fetch_optional(&pool)
            .await
            .map_err(|e| tracing::warn!("[ContentCache] backup lookup failed: {e}"))
            .ok()?
            .map(|(content,)| content)
    }

    /// Purge stale rows. Runs at most once per cache handle; later calls return `None`.
    #[tracing::instrument(skip_all)]
    pub async fn maintain(
        &self,
        files: &dyn FileProvider,
    ) -> Result<Option<MaintenanceReport>, SceneDocError> {
        let Some(pool) = self.pool().await else {
            return Ok(None);
        };
        if self.inner.maintained.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        let mut report = MaintenanceReport::default();

        let rows = sqlx::query_as::<_, (String, String, i64, Option<String>, Option<Vec<u8>>)>(
            "SELECT key, locator, mtime, svg, blob FROM renders",
        )
        .fetch_all(&pool)
        .await?;
        let mut doomed = Vec::new();
        for (key, locator, mtime, svg, blob) in rows {
            let empty = svg.as_deref().is_none_or(|s| s.trim().is_empty())
                && blob.as_deref().is_none_or(<[u8]>::is_empty);
            if !is_current(&key) {
                report.stale_version += 1;
            } else if empty {
                report.empty += 1;
            } else {
                match files.stat(&locator).await {
                    Err(_) => report.source_missing += 1,
                    Ok(stat) if stat.mtime_ms > mtime => report.source_newer += 1,
                    Ok(_) => continue,
                }
            }
            doomed.push(key);
        }
        for key in &doomed {
            sqlx::query("DELETE FROM renders WHERE key = ?")
                .bind(key)
                .execute(&pool)
                .await?;
        }

        let backups = sqlx::query_as::<_, (String,)>("SELECT path FROM backups")
            .fetch_all(&pool)
            .await?;
        for (path,) in backups {
            if files.stat(&path).await.is_err() {
                sqlx::query("DELETE FROM backups WHERE path = ?")
                    .bind(&path)
                    .execute(&pool)
                    .await?;
                report.backups_removed += 1;
            }
        }
        self.inner.handles.lock().clear();
        tracing::info!(
            "[ContentCache] maintenance removed {} renders and {} backups",
            report.renders_removed(),
            report.backups_removed
        );
        Ok(Some(report))
    }

    /// Run [`ContentCache::maintain`] after the configured delay, off the caller's task.
    pub fn maintenance_after_delay(
        &self,
        files: Arc<dyn FileProvider>,
    ) -> JoinHandle<Option<MaintenanceReport>> {
        let cache = self.clone();
        let delay = self.inner.maintenance_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match cache.maintain(files.as_ref()).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!("[ContentCache] maintenance failed: {e}");
                    None
                }
            }
        })
    }
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            Ok(self
                .0
                .into_iter()
                .filter(|m| matches!(m.kind, MigrationType::ReversibleUp))
                .map(|m| {
                    SqlxMigration::new(m.version, m.description.into(), m.kind, m.sql.into(), false)
                })
                .collect())
        })
    }
}

pub async fn cache_db_init(db_path: PathBuf) -> Result<Pool<Sqlite>, SceneDocError> {
    let fqdb = format!("sqlite:{}", db_path.to_string_lossy());
    tracing::debug!("[ContentCache] opening cache db {fqdb}");
    if !Sqlite::database_exists(&fqdb).await.unwrap_or(false) {
        Sqlite::create_database(&fqdb).await?;
    }
    let options = SqliteConnectOptions::from_str(&fqdb)?
        .read_only(false)
        .disable_statement_logging()
        .create_if_missing(true);
    let pool = PoolOptions::<Sqlite>::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    let migrations = MigrationList(vec![Migration {
        version: 1,
        description: "create_cache_tables",
        sql: "\
        CREATE TABLE renders (key TEXT PRIMARY KEY, locator TEXT NOT NULL, mtime INTEGER NOT NULL, dep_hash TEXT NOT NULL, kind TEXT NOT NULL, svg TEXT, blob BLOB, width REAL NOT NULL, height REAL NOT NULL, created INTEGER NOT NULL); \
        CREATE INDEX renders_locator ON renders (locator); \
        CREATE TABLE backups (path TEXT PRIMARY KEY, content TEXT NOT NULL, mtime INTEGER NOT NULL);",
        kind: MigrationType::ReversibleUp,
    }]);
    let migrator = Migrator::new(migrations).await.map_err(sqlx::Error::from)?;
    migrator.run(&pool).await.map_err(sqlx::Error::from)?;

    let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM renders")
        .fetch_one(&pool)
        .await?;
    tracing::info!("[ContentCache] cache db ready with {count} renders");
    Ok(pool)
}
