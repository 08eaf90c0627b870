use crate::error::SceneDocError;
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    time::Duration,
};

/// Settings for the sync engine, the asset resolver and the content cache.
///
/// Every section defaults independently, so a TOML file only needs the keys it changes:
///
/// ```toml
/// [resolve]
/// concurrency = 8
///
/// [cache]
/// enabled = false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    pub document: DocumentConfig,
    pub links: LinkConfig,
    pub resolve: ResolveConfig,
    pub pdf: PdfConfig,
    pub markdown_embed: MarkdownEmbedConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Write the scene as a `compressed-json` block.
    pub compress: bool,
    /// Characters per line of the compressed payload.
    pub compressed_line_width: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        DocumentConfig {
            compress: false,
            compressed_line_width: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub link_prefix: String,
    pub url_prefix: String,
    pub show_link_brackets: bool,
    /// Maximum characters inlined from a whole-document transclusion.
    pub transclusion_char_budget: usize,
    /// Wrap width applied to transclusions without a `{N}` suffix. 0 disables wrapping.
    pub default_wrap_width: usize,
    pub checkbox_unchecked: String,
    pub checkbox_checked: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            link_prefix: "📍".to_string(),
            url_prefix: "🌐".to_string(),
            show_link_brackets: true,
            transclusion_char_budget: 200,
            default_wrap_width: 0,
            checkbox_unchecked: "☐".to_string(),
            checkbox_checked: "🗹".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Concurrent in-flight resolutions per batch.
    pub concurrency: usize,
    pub batch_flush_interval_ms: u64,
    /// Upper bound for a single resolution unit.
    pub unit_timeout_ms: u64,
    /// Nested scene depth after which resolution gives up.
    pub max_scene_depth: usize,
    pub missing_asset_retry_limit: u32,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        ResolveConfig {
            concurrency: 5,
            batch_flush_interval_ms: 250,
            unit_timeout_ms: 30_000,
            max_scene_depth: 7,
            missing_asset_retry_limit: 3,
        }
    }
}

impl ResolveConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.batch_flush_interval_ms.max(1))
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_millis(self.unit_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    pub scale: f64,
    pub max_attempts: u32,
    /// Linear backoff step: attempt `n` waits `n * backoff_ms` before retrying.
    pub backoff_ms: u64,
}

impl Default for PdfConfig {
    fn default() -> Self {
        PdfConfig {
            scale: 1.5,
            max_attempts: 3,
            backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkdownEmbedConfig {
    pub width: f64,
    pub max_height: f64,
    pub font_family: String,
    pub font_size: f64,
    pub border: Option<String>,
}

impl Default for MarkdownEmbedConfig {
    fn default() -> Self {
        MarkdownEmbedConfig {
            width: 500.0,
            max_height: 800.0,
            font_family: "Virgil, Segoe UI Emoji".to_string(),
            font_size: 16.0,
            border: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    pub ready_timeout_ms: u64,
    pub maintenance_delay_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            path: None,
            ready_timeout_ms: 50,
            maintenance_delay_secs: 60,
        }
    }
}

pub trait ConfigProvider: Send + Sync {
    fn get_config(&self) -> Result<SyncConfig, SceneDocError>;
    fn set_config(&self, config: &SyncConfig) -> Result<(), SceneDocError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get_config(&self) -> Result<SyncConfig, SceneDocError> {
        tracing::debug!("Attempting to read config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(SyncConfig::default());
        }
        let content = read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }

    fn set_config(&self, config: &SyncConfig) -> Result<(), SceneDocError> {
        tracing::debug!("Attempting to write config to: {:?}", &self.path);
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig, SceneDocError> {
    TomlConfigProvider::new(path.as_ref().to_path_buf()).get_config()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
[resolve]
concurrency = 2

[links]
show_link_brackets = false
"#,
        )
        .unwrap();
        assert_eq!(config.resolve.concurrency, 2);
        assert_eq!(config.resolve.max_scene_depth, 7);
        assert!(!config.links.show_link_brackets);
        assert_eq!(config.links.link_prefix, "📍");
        assert!(config.cache.enabled);
    }

    #[test]
    fn provider_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let provider = TomlConfigProvider::new(dir.path().join("scenedoc.toml"));
        assert_eq!(provider.get_config().unwrap(), SyncConfig::default());

        let mut config = SyncConfig::default();
        config.document.compress = true;
        config.pdf.max_attempts = 5;
        provider.set_config(&config).unwrap();
        assert_eq!(provider.get_config().unwrap(), config);
    }
}
