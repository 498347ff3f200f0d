use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, bail};
use tokio::fs as async_fs;
use tracing::{debug, info};

use crate::proxy::error::CacheIoError;

use super::key::{CacheKey, PARTIAL_DIR};
use super::writer::CacheWriter;

/// Disk cache mapping request filenames to files under a root directory.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    next_temp: AtomicU64,
}

impl CacheStore {
    /// Wipes `root` and recreates it empty. Run once before the proxy starts accepting.
    ///
    /// Refuses to wipe the filesystem root, the home directory, or the working directory and
    /// its ancestors.
    pub async fn prepare(root: PathBuf) -> Result<Self> {
        if async_fs::try_exists(&root)
            .await
            .context(CacheIoError::new("inspect root", &root))?
        {
            let resolved = async_fs::canonicalize(&root)
                .await
                .context(CacheIoError::new("resolve root", &root))?;
            let cwd = std::env::current_dir().ok();
            let home = std::env::var_os("HOME").map(PathBuf::from);
            check_wipe_target(&resolved, cwd.as_deref(), home.as_deref())?;
            async_fs::remove_dir_all(&root)
                .await
                .context(CacheIoError::new("wipe root", &root))?;
            debug!(root = %root.display(), "removed previous cache contents");
        }
        let partial = root.join(PARTIAL_DIR);
        async_fs::create_dir_all(&partial)
            .await
            .context(CacheIoError::new("create root", &partial))?;
        info!(root = %root.display(), "cache root ready");
        Ok(Self {
            root,
            next_temp: AtomicU64::new(1),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// True when a complete entry is on disk for `key`.
    pub async fn exists(&self, key: &CacheKey) -> bool {
        async_fs::metadata(self.path_for(key))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    pub async fn open_for_read(&self, key: &CacheKey) -> Result<async_fs::File> {
        let path = self.path_for(key);
        async_fs::File::open(&path)
            .await
            .context(CacheIoError::new("open for read", &path))
    }

    /// Creates the entry's parent directories and a fresh temporary file to write it into.
    pub async fn open_for_write(&self, key: &CacheKey) -> Result<CacheWriter> {
        let final_path = self.path_for(key);
        if let Some(parent) = final_path.parent() {
            async_fs::create_dir_all(parent)
                .await
                .context(CacheIoError::new("create directory", parent))?;
        }

        let temp_path = self.root.join(PARTIAL_DIR).join(format!(
            "tmp_{}_{}",
            std::process::id(),
            self.next_temp.fetch_add(1, Ordering::Relaxed)
        ));
        let file = async_fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await
            .context(CacheIoError::new("open for write", &temp_path))?;
        Ok(CacheWriter::new(file, temp_path, final_path))
    }
}

/// Rejects cache roots whose removal would take unrelated data with it.
fn check_wipe_target(resolved: &Path, cwd: Option<&Path>, home: Option<&Path>) -> Result<()> {
    if resolved.parent().is_none() {
        bail!("refusing to use {} as cache_dir: it is a filesystem root", resolved.display());
    }
    if cwd.is_some_and(|cwd| cwd.starts_with(resolved)) {
        bail!(
            "refusing to use {} as cache_dir: it contains the working directory",
            resolved.display()
        );
    }
    if home.is_some_and(|home| home == resolved) {
        bail!("refusing to use {} as cache_dir: it is the home directory", resolved.display());
    }
    Ok(())
}
