mod request;
mod response;

use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::{AsyncWrite, BufReader};
use tracing::{debug, warn};

use crate::io_util::Interruptible;
use crate::proxy::AppContext;
use crate::proxy::cache::{CacheKey, CacheStoreOutcome};
use crate::proxy::target::OriginTarget;
use crate::proxy::upstream::connect_origin;

use super::codec::HttpMessage;

pub use response::{RelayReport, relay_response};

pub struct ForwardResult {
    pub upstream_addr: SocketAddr,
    pub relay: RelayReport,
}

/// Handles a cache miss: connects to the origin, forwards the request, and relays the response
/// to the client while caching it under `cache_key`.
///
/// Errors before the response starts (connect, request write) are returned; relay failures are
/// reported in [`RelayReport::result`]. The origin connection is closed on return.
pub async fn forward_to_origin<C>(
    client: &mut C,
    request: &HttpMessage,
    origin: &OriginTarget,
    cache_key: Option<&CacheKey>,
    app: &AppContext,
    io: &Interruptible,
) -> Result<ForwardResult>
where
    C: AsyncWrite + Unpin,
{
    let settings = &app.settings;
    let (stream, upstream_addr) =
        connect_origin(origin, settings.upstream_connect_timeout()).await?;
    let (origin_reader, mut origin_writer) = stream.into_split();

    let bytes_to_origin =
        request::send_origin_request(&mut origin_writer, request, origin, io).await?;
    debug!(
        origin = %upstream_addr,
        path = %origin.path,
        bytes = bytes_to_origin,
        "request forwarded to origin"
    );

    let mut open_failed = false;
    let cache_writer = match cache_key {
        Some(key) => match app.cache.open_for_write(key).await {
            Ok(writer) => Some(writer),
            Err(err) => {
                warn!(key = key.as_str(), error = ?err, "cache entry unavailable; relaying without cache");
                open_failed = true;
                None
            }
        },
        None => None,
    };

    let mut origin_reader = BufReader::new(origin_reader);
    let mut relay = relay_response(
        &mut origin_reader,
        client,
        cache_writer,
        io,
        settings.max_header_size,
        settings.relay_chunk_size,
    )
    .await;
    if open_failed {
        relay.cache = CacheStoreOutcome::Failed;
    }

    Ok(ForwardResult {
        upstream_addr,
        relay,
    })
}
