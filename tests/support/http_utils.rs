use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

const READ_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Reads until the proxy closes the connection.
pub async fn read_response_bytes<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    timeout(READ_TIMEOUT, stream.read_to_end(&mut buf))
        .await
        .context("timed out waiting for the proxy to close")??;
    Ok(buf)
}

pub async fn read_http_response<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let buf = read_response_bytes(stream).await?;
    Ok(String::from_utf8_lossy(&buf).to_string())
}

pub async fn read_until_double_crlf<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        let bytes = stream.read(&mut byte).await?;
        if bytes == 0 {
            break;
        }
        buffer.extend_from_slice(&byte);
        if buffer.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    Ok(buffer)
}
