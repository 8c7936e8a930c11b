//! File-backed cache store: one `{md5}.cache` file per key.

use super::{CacheKey, CacheStore};
use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    fn cache_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let pattern = format!(
            "{}/*.cache",
            glob::Pattern::escape(&self.dir.to_string_lossy())
        );
        let paths = glob::glob(&pattern)
            .map_err(|e| Error::Config(format!("invalid cache path pattern: {}", e)))?;
        Ok(paths.filter_map(|entry| entry.ok()).collect())
    }
}

impl CacheStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, key: &CacheKey, payload: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        // Readers never see a partially written entry; every writer gets its
        // own temp file, so concurrent writes of one key cannot interleave
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(payload)?;
        tmp.persist(self.path_for(key))
            .map_err(|e| Error::from(e.error))?;
        Ok(())
    }

    fn clear(&self) -> Result<bool> {
        let mut cleared = true;
        for path in self.cache_files()? {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete cache file");
                cleared = false;
            }
        }
        Ok(cleared)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.cache_files()?.len())
    }
}
