use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::io_util::Interruptible;
use crate::proxy::error::CacheIoError;

use super::{CacheKey, CacheStore};

/// Streams a stored entry to the client verbatim, returning the byte count.
pub async fn serve_cached<C>(
    store: &CacheStore,
    key: &CacheKey,
    client: &mut C,
    io: &Interruptible,
    chunk_size: usize,
) -> Result<u64>
where
    C: AsyncWrite + Unpin,
{
    let path = store.path_for(key);
    let mut file = store.open_for_read(key).await?;
    let mut buffer = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        let read = io
            .run(file.read(&mut buffer), "reading cache entry")
            .await
            .context(CacheIoError::new("read", &path))?;
        if read == 0 {
            break;
        }
        io.run(
            client.write_all(&buffer[..read]),
            "writing cached response to client",
        )
        .await?;
        total = total.saturating_add(read as u64);
    }
    io.run(client.flush(), "flushing cached response to client")
        .await?;
    Ok(total)
}
