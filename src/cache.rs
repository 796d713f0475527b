//! Local cache of full-day files.
//!
//! A cache file is written once under a temporary name and renamed into place,
//! so a file visible under its final name is always complete.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

use crate::area::Area;
use crate::error::AncillaryError;

/// Identifies one full-day file: provider, model, variables, day and area.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey {
    pub provider: String,
    pub model: String,
    pub variables: Vec<String>,
    pub day: NaiveDate,
    pub area: Area,
}

impl CacheKey {
    /// `{provider}_{model}_{area}_{vars}_{YYYYMMDD}.nc`, variables sorted.
    pub fn file_name(&self) -> String {
        let mut vars: Vec<&str> = self.variables.iter().map(String::as_str).collect();
        vars.sort_unstable();
        vars.dedup();
        format!(
            "{}_{}_{}_{}_{}.nc",
            self.provider,
            self.model,
            self.area.cache_token(),
            vars.join("_"),
            self.day.format("%Y%m%d")
        )
    }
}

#[derive(Debug, Clone)]
pub struct FileCache {
    directory: PathBuf,
}

impl FileCache {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(AncillaryError::MissingDirectory(directory).into());
        }
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.directory.join(key.file_name())
    }

    /// Returns the cached file for `key`, running `producer` to create it when missing.
    ///
    /// `producer` receives a temporary path inside the cache directory and must
    /// write the complete file there.
    pub fn fetch<F>(&self, key: &CacheKey, offline: bool, producer: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let path = self.path_for(key);
        if path.exists() {
            tracing::info!("found locally: {}", path.display());
            return Ok(path);
        }
        if offline {
            return Err(AncillaryError::OfflineMissing { path }.into());
        }

        tracing::info!("downloading: {}", path.display());
        let file_name = key.file_name();
        self.produce(&path, |tmp_dir| {
            let tmp = tmp_dir.join(&file_name);
            producer(&tmp)?;
            Ok(tmp)
        })?;
        Ok(path)
    }

    fn produce<F>(&self, path: &Path, f: F) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<PathBuf>,
    {
        let tmp_dir = tempfile::Builder::new()
            .prefix(".tmp")
            .tempdir_in(&self.directory)
            .with_context(|| {
                format!("failed to create a temporary directory in {}", self.directory.display())
            })?;

        let tmp = f(tmp_dir.path())?;
        let len = fs::metadata(&tmp)
            .with_context(|| format!("no file was produced for {}", path.display()))?
            .len();
        if len == 0 {
            bail!("empty file produced for {}", path.display());
        }
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to move {} to {}", tmp.display(), path.display()))?;
        Ok(())
    }
}

/// Memoizes `compute()` as JSON at `path`.
pub fn cache_json<T, F>(path: &Path, compute: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T>,
{
    if path.exists() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        return serde_json::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()));
    }

    let value = compute()?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create a temporary file in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut tmp, &value)?;
    tmp.persist(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(value)
}
