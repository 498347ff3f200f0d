use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tracing::{debug, warn};

use crate::io_util::{Interruptible, TeeCacheState, TeeWriter};
use crate::proxy::cache::{CacheStoreOutcome, CacheWriter};

use super::super::codec::{HeaderLine, MessageHead, expect_message_head};

/// Result of relaying one origin response. The relay error, if any, is carried rather than
/// returned so the caller can still log what reached the client.
pub struct RelayReport {
    pub status_line: Option<String>,
    pub bytes_to_client: u64,
    pub cache: CacheStoreOutcome,
    pub result: Result<()>,
}

/// Strips every `Connection` header and appends `Connection: close`.
pub(crate) fn force_connection_close(headers: &mut Vec<HeaderLine>) {
    headers.retain(|header| !header.is("connection"));
    headers.push(HeaderLine::new("Connection", "close"));
}

/// How a relay that reached the origin's end of stream ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BodyEnd {
    Complete,
    /// The origin closed before the announced `Content-Length`, as after a `HEAD` reply.
    Short { announced: usize, received: u64 },
}

/// Relays the origin response to the client and, when `cache` is given, into the cache entry.
///
/// Only the origin's headline and headers are parsed; they are re-emitted with
/// `Connection: close`, then every body byte is copied in `chunk_size` pieces until the origin
/// closes. The cache entry is published only if the relay succeeded and the body was not
/// shorter than announced.
pub async fn relay_response<S, C>(
    origin: &mut BufReader<S>,
    client: &mut C,
    cache: Option<CacheWriter>,
    io: &Interruptible,
    max_header_bytes: usize,
    chunk_size: usize,
) -> RelayReport
where
    S: AsyncRead + Unpin,
    C: AsyncWrite + Unpin,
{
    let mut tee = TeeWriter::new(client, cache);
    let mut status_line = None;
    let relayed = relay_into(
        origin,
        &mut tee,
        io,
        max_header_bytes,
        chunk_size,
        &mut status_line,
    )
    .await;
    let bytes_to_client = tee.written();
    let (writer, state) = tee.into_cache();

    let (result, body_end) = match relayed {
        Ok(end) => (Ok(()), Some(end)),
        Err(err) => (Err(err), None),
    };
    let cache = match (writer, body_end) {
        (Some(writer), Some(BodyEnd::Complete)) => match writer.finish().await {
            Ok(stored) => {
                debug!(bytes = stored, "response cached");
                CacheStoreOutcome::Stored
            }
            Err(err) => {
                warn!(error = ?err, "failed to publish cache entry");
                CacheStoreOutcome::Failed
            }
        },
        (Some(writer), Some(BodyEnd::Short { announced, received })) => {
            debug!(announced, received, "origin body shorter than announced; not caching");
            writer.discard().await;
            CacheStoreOutcome::Discarded
        }
        (Some(writer), None) => {
            writer.discard().await;
            CacheStoreOutcome::Discarded
        }
        (None, _) if state == TeeCacheState::Failed => CacheStoreOutcome::Failed,
        (None, _) => CacheStoreOutcome::Skipped,
    };

    RelayReport {
        status_line,
        bytes_to_client,
        cache,
        result,
    }
}

async fn relay_into<S, C>(
    origin: &mut BufReader<S>,
    tee: &mut TeeWriter<'_, C, CacheWriter>,
    io: &Interruptible,
    max_header_bytes: usize,
    chunk_size: usize,
    status_line: &mut Option<String>,
) -> Result<BodyEnd>
where
    S: AsyncRead + Unpin,
    C: AsyncWrite + Unpin,
{
    let MessageHead {
        message: mut response,
        body_length,
    } = expect_message_head(origin, io, max_header_bytes).await?;
    *status_line = Some(response.headline.clone());
    force_connection_close(&mut response.headers);
    tee.write_all(&response.encode_head(), io).await?;

    let mut received = 0u64;
    let mut buffer = vec![0u8; chunk_size];
    loop {
        let read = io
            .run(origin.read(&mut buffer), "reading response from origin")
            .await?;
        if read == 0 {
            break;
        }
        received += read as u64;
        tee.write_all(&buffer[..read], io).await?;
    }
    tee.flush(io).await?;

    Ok(match body_length {
        Some(announced) if received < announced as u64 => BodyEnd::Short {
            announced,
            received,
        },
        _ => BodyEnd::Complete,
    })
}
