use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use anyhow::{Context, Result, anyhow};
use tokio::fs as async_fs;
use tokio::fs::File as AsyncFile;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::proxy::error::CacheIoError;

/// Write handle for one cache entry.
///
/// Bytes go to a temporary file; `finish` publishes it at the entry's path with a rename, so a
/// reader never sees a partially written entry. Dropping an unfinished writer deletes the
/// temporary file.
#[derive(Debug)]
pub struct CacheWriter {
    file: AsyncFile,
    temp_path: PathBuf,
    final_path: PathBuf,
    written: u64,
    finished: bool,
}

impl CacheWriter {
    pub(super) fn new(file: AsyncFile, temp_path: PathBuf, final_path: PathBuf) -> Self {
        Self {
            file,
            temp_path,
            final_path,
            written: 0,
            finished: false,
        }
    }

    /// Flushes and renames the entry into place, returning its size.
    pub async fn finish(mut self) -> Result<u64> {
        self.file
            .flush()
            .await
            .context(CacheIoError::new("flush", &self.temp_path))?;
        self.file
            .sync_all()
            .await
            .context(CacheIoError::new("sync", &self.temp_path))?;

        let parent = self
            .final_path
            .parent()
            .ok_or_else(|| anyhow!("cache entry path missing parent"))?;
        async_fs::create_dir_all(parent)
            .await
            .context(CacheIoError::new("create directory", parent))?;
        async_fs::rename(&self.temp_path, &self.final_path)
            .await
            .context(CacheIoError::new("publish", &self.final_path))?;

        self.finished = true;
        trace!(path = %self.final_path.display(), bytes = self.written, "stored cache entry");
        Ok(self.written)
    }

    /// Removes the temporary file without publishing anything.
    pub async fn discard(mut self) {
        self.finished = true;
        if let Err(err) = async_fs::remove_file(&self.temp_path).await {
            trace!(path = %self.temp_path.display(), error = %err, "failed to remove unfinished cache entry");
        }
    }
}

impl AsyncWrite for CacheWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match Pin::new(&mut self.file).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                self.written = self.written.saturating_add(written as u64);
                Poll::Ready(Ok(written))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        trace!(path = %self.temp_path.display(), "discarding unfinished cache entry");
        let temp_path = self.temp_path.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = async_fs::remove_file(temp_path).await;
            });
        } else {
            let _ = std::fs::remove_file(&temp_path);
        }
    }
}
