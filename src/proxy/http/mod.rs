pub mod codec;
mod forward;

use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

use crate::io_util::Interruptible;
use crate::logging::AccessLogBuilder;
use crate::proxy::AppContext;
use crate::proxy::cache::{CacheKey, CacheLookup, CacheStoreOutcome, serve_cached};
use crate::proxy::error::{MalformedMessage, classify_proxy_error, log_proxy_error};
use crate::proxy::target::{parse_origin_target, request_filename};

use codec::{HttpMessage, read_http_message};

use forward::{ForwardResult, forward_to_origin};

/// Serves one client connection: a single request, answered from the cache or the origin.
///
/// Only failures before a request was parsed are returned; everything after that is logged
/// here, together with the access-log line.
pub async fn handle_http<S>(stream: S, peer: SocketAddr, app: AppContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let start = Instant::now();
    let settings = &app.settings;
    let io = Interruptible::new(app.shutdown.clone(), settings.poll_interval())
        .with_timeout(settings.request_timeout());
    let mut client = BufReader::new(stream);

    let Some(request) = read_http_message(&mut client, &io, settings.message_limits()).await?
    else {
        trace!(peer = %peer, "client closed without sending a request");
        return Ok(());
    };

    serve_request(&mut client, &request, peer, &app, &io, start).await;

    if let Err(err) = io
        .run(client.get_mut().shutdown(), "closing client connection")
        .await
    {
        trace!(peer = %peer, error = %err, "client shutdown failed");
    }
    Ok(())
}

/// What the access log needs to know about a served request.
struct ServeReport {
    host: String,
    upstream_addr: Option<SocketAddr>,
    status_line: Option<String>,
    bytes_out: u64,
    cache_store: CacheStoreOutcome,
    result: Result<()>,
}

impl ServeReport {
    fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            upstream_addr: None,
            status_line: None,
            bytes_out: 0,
            cache_store: CacheStoreOutcome::Skipped,
            result: Ok(()),
        }
    }

    fn failed(mut self, err: anyhow::Error) -> Self {
        self.result = Err(err);
        self
    }
}

async fn serve_request<S>(
    client: &mut BufReader<S>,
    request: &HttpMessage,
    peer: SocketAddr,
    app: &AppContext,
    io: &Interruptible,
    start: Instant,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let method = request.method().unwrap_or_default();
    let filename = request_filename(request.target().unwrap_or_default());
    if filename.is_empty() {
        debug!(peer = %peer, headline = %request.headline, "request names no origin; closing");
        return;
    }

    let key = CacheKey::from_filename(filename);
    let lookup = match &key {
        None => CacheLookup::Bypass,
        Some(key) if method == "GET" && app.cache.exists(key).await => CacheLookup::Hit,
        Some(_) => CacheLookup::Miss,
    };

    let report = match (&key, lookup) {
        (Some(key), CacheLookup::Hit) => serve_hit(client, key, filename, app, io).await,
        _ => serve_miss(client, request, filename, key.as_ref(), app, io).await,
    };

    let mut log = AccessLogBuilder::new(peer)
        .method(method)
        .host(report.host)
        .path(filename)
        .cache_lookup(lookup)
        .cache_store(report.cache_store)
        .status_line(report.status_line.as_deref())
        .bytes(request_size(request), report.bytes_out)
        .elapsed(start.elapsed());
    if let Some(addr) = report.upstream_addr {
        log = log.upstream_addr(addr);
    }
    if let Err(err) = &report.result {
        let kind = classify_proxy_error(err);
        log_proxy_error(&kind, peer, filename, err);
        log = log.error(kind.reason(), format!("{err:#}"));
    }
    log.log();
}

async fn serve_hit<S>(
    client: &mut BufReader<S>,
    key: &CacheKey,
    filename: &str,
    app: &AppContext,
    io: &Interruptible,
) -> ServeReport
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let report = ServeReport::new(filename.split('/').next().unwrap_or_default());
    match serve_cached(
        &app.cache,
        key,
        client.get_mut(),
        io,
        app.settings.relay_chunk_size,
    )
    .await
    {
        Ok(bytes_out) => {
            debug!(key = key.as_str(), bytes = bytes_out, "served from cache");
            ServeReport {
                bytes_out,
                ..report
            }
        }
        Err(err) => report.failed(err),
    }
}

async fn serve_miss<S>(
    client: &mut BufReader<S>,
    request: &HttpMessage,
    filename: &str,
    key: Option<&CacheKey>,
    app: &AppContext,
    io: &Interruptible,
) -> ServeReport
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let origin = match parse_origin_target(filename) {
        Ok(origin) => origin,
        Err(err) => {
            let malformed = MalformedMessage::new(format!("{err:#}"));
            return ServeReport::new(filename.split('/').next().unwrap_or_default())
                .failed(malformed.into());
        }
    };
    let report = ServeReport::new(origin.host.clone());

    match forward_to_origin(client.get_mut(), request, &origin, key, app, io).await {
        Ok(ForwardResult {
            upstream_addr,
            relay,
        }) => ServeReport {
            upstream_addr: Some(upstream_addr),
            status_line: relay.status_line,
            bytes_out: relay.bytes_to_client,
            cache_store: relay.cache,
            result: relay.result,
            ..report
        },
        Err(err) => report.failed(err),
    }
}

fn request_size(request: &HttpMessage) -> u64 {
    let body = request.body.as_ref().map_or(0, |body| body.len());
    (request.encode_head().len() + body) as u64
}

#[cfg(feature = "fuzzing")]
pub mod fuzzing {
    use std::time::Duration;

    use anyhow::Result;
    use tokio::io::{AsyncRead, BufReader};

    use crate::io_util::{Interruptible, Shutdown};
    use crate::proxy::cache::CacheKey;
    use crate::proxy::target::{parse_origin_target, request_filename};

    use super::codec::{MessageLimits, read_http_message};

    pub async fn parse_http_message<S>(reader: &mut BufReader<S>, max_header_bytes: usize) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        let io = Interruptible::new(Shutdown::new(), Duration::from_secs(1));
        let limits = MessageLimits {
            max_header_bytes,
            max_body_bytes: max_header_bytes,
        };
        if let Some(message) = read_http_message(reader, &io, limits).await? {
            let _ = message.encode_head();
            if let Some(target) = message.target() {
                parse_request_target(target);
            }
        }
        Ok(())
    }

    pub fn parse_request_target(target: &str) {
        let filename = request_filename(target);
        let _ = CacheKey::from_filename(filename);
        let _ = parse_origin_target(filename);
    }
}
