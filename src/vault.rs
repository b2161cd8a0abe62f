//! Vault access: the [`Vault`] trait, a filesystem implementation, and
//! include/exclude glob filtering.
//!
//! Paths are vault-relative and `/`-separated on every platform.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

/// A note file as listed by the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultFile {
    pub path: String,
    /// Creation time, Unix milliseconds.
    pub ctime: i64,
    /// Modification time, Unix milliseconds.
    pub mtime: i64,
}

/// The host's note collection.
#[async_trait]
pub trait Vault: Send + Sync {
    async fn list_files(&self) -> Result<Vec<VaultFile>>;
    async fn read_file(&self, path: &str) -> Result<String>;
    async fn file_exists(&self, path: &str) -> Result<bool>;
    /// Metadata for one file, `None` if it does not exist.
    async fn stat(&self, path: &str) -> Result<Option<VaultFile>>;
}

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/.obsidian/**", "**/.trash/**"];

/// Include/exclude glob filter over vault-relative paths.
#[derive(Debug, Clone)]
pub struct FileFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl FileFilter {
    pub fn new(include_globs: &[String], exclude_globs: &[String]) -> Result<Self> {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(exclude_globs.iter().cloned());
        Ok(Self {
            include: build_globset(include_globs)?,
            exclude: build_globset(&excludes)?,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        !self.exclude.is_match(path) && self.include.is_match(path)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {pattern}"))?);
    }
    Ok(builder.build()?)
}

/// A vault rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            bail!("Vault root does not exist: {}", root.display());
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if Path::new(path).is_absolute() || path.split('/').any(|seg| seg == "..") {
            bail!("Path escapes the vault: {path}");
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl Vault for FsVault {
    async fn list_files(&self) -> Result<Vec<VaultFile>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan(&root)).await?
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .with_context(|| format!("Failed to read {}", full.display()))
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await?)
    }

    async fn stat(&self, path: &str) -> Result<Option<VaultFile>> {
        let full = self.resolve(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Ok(Some(to_vault_file(path.to_string(), &meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn scan(root: &Path) -> Result<Vec<VaultFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let meta = entry.metadata()?;
        files.push(to_vault_file(rel_str, &meta));
    }
    // Sort for deterministic ordering
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn to_vault_file(path: String, meta: &std::fs::Metadata) -> VaultFile {
    let mtime = meta.modified().map(unix_millis).unwrap_or(0);
    let ctime = meta.created().map(unix_millis).unwrap_or(mtime);
    VaultFile { path, ctime, mtime }
}

fn unix_millis(t: SystemTime) -> i64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
