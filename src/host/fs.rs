use async_trait::async_trait;
use std::{
    path::{Component, Path, PathBuf},
    time::UNIX_EPOCH,
};
use walkdir::WalkDir;

use crate::{
    error::SceneDocError,
    host::{DocumentProvider, FetchedFile, FileProvider, FileStat, PathResolver},
};

/// A directory of documents and attachments addressed by `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        FsVault {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a vault path. Parent components may not climb out of the root.
    pub fn full_path(&self, path: &str) -> Result<PathBuf, SceneDocError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(SceneDocError::NotFound(format!(
                "{path} is outside of the vault"
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Vault path of an absolute path below the root.
    pub fn vault_path(&self, full: &Path) -> Option<String> {
        let relative = full.strip_prefix(&self.root).ok()?;
        Some(
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
        )
    }

    fn existing(&self, candidate: &str) -> Option<String> {
        let full = self.full_path(candidate).ok()?;
        if full.is_file() {
            self.vault_path(&full)
        } else {
            None
        }
    }

    fn find_by_name(&self, name: &str) -> Option<String> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .find(|entry| entry.file_name().to_string_lossy() == name)
            .and_then(|entry| self.vault_path(entry.path()))
    }
}

/// Join `link` onto the directory of `source`, folding `.` and `..` components.
fn join_relative(source: &str, link: &str) -> String {
    let mut parts: Vec<&str> = source.split('/').collect();
    parts.pop();
    for segment in link.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

#[async_trait]
impl FileProvider for FsVault {
    async fn read_binary(&self, path: &str) -> Result<Vec<u8>, SceneDocError> {
        Ok(tokio::fs::read(self.full_path(path)?).await?)
    }

    async fn stat(&self, path: &str) -> Result<FileStat, SceneDocError> {
        let metadata = tokio::fs::metadata(self.full_path(path)?).await?;
        let mtime_ms = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Ok(FileStat {
            mtime_ms,
            size: metadata.len(),
        })
    }

    async fn fetch_url(&self, url: &str) -> Result<FetchedFile, SceneDocError> {
        let parsed = url::Url::parse(url)?;
        if parsed.scheme() != "file" {
            return Err(SceneDocError::Unsupported(format!(
                "FsVault does not fetch remote URLs ({url})"
            )));
        }
        let path = parsed
            .to_file_path()
            .map_err(|_| SceneDocError::NotFound(format!("{url} is not a local file")))?;
        let bytes = tokio::fs::read(&path).await?;
        Ok(FetchedFile {
            mime_type: mime_guess::from_path(&path).first().map(|m| m.to_string()),
            bytes,
        })
    }
}

impl PathResolver for FsVault {
    fn resolve_link(&self, link: &str, source_path: &str) -> Option<String> {
        let target = link.split(['#', '|']).next().unwrap_or_default().trim();
        if target.is_empty() {
            return Some(source_path.to_string());
        }
        let has_extension = Path::new(target).extension().is_some();
        let mut candidates = vec![join_relative(source_path, target), target.to_string()];
        if !has_extension {
            candidates.push(format!("{}.md", join_relative(source_path, target)));
            candidates.push(format!("{target}.md"));
        }
        if let Some(found) = candidates.iter().find_map(|c| self.existing(c)) {
            return Some(found);
        }
        let name = target.rsplit('/').next().unwrap_or(target);
        self.find_by_name(name).or_else(|| {
            (!has_extension)
                .then(|| self.find_by_name(&format!("{name}.md")))
                .flatten()
        })
    }
}

#[async_trait]
impl DocumentProvider for FsVault {
    async fn read_document(&self, path: &str) -> Result<String, SceneDocError> {
        Ok(tokio::fs::read_to_string(self.full_path(path)?).await?)
    }
}
