use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::debug;

use crate::proxy::error::OriginConnectError;
use crate::proxy::target::OriginTarget;
use crate::util::timeout_with_context;

/// Resolves the origin and connects to the first address that accepts within `connect_timeout`.
pub async fn connect_origin(
    target: &OriginTarget,
    connect_timeout: Duration,
) -> Result<(TcpStream, SocketAddr)> {
    let origin_error = || OriginConnectError {
        host: target.host.clone(),
        port: target.port,
    };
    let addrs: Vec<SocketAddr> = timeout_with_context(
        connect_timeout,
        lookup_host((target.host.as_str(), target.port)),
        format!("resolving {}", target.authority()),
    )
    .await
    .with_context(origin_error)?
    .collect();
    connect_to_addrs(&addrs, connect_timeout)
        .await
        .with_context(origin_error)
}

/// Attempt each socket address in order; the last failure is reported if none connects.
pub async fn connect_to_addrs(
    addrs: &[SocketAddr],
    connect_timeout: Duration,
) -> Result<(TcpStream, SocketAddr)> {
    let mut last_err = None;
    for addr in addrs {
        match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(
                        host = %addr.ip(),
                        port = addr.port(),
                        error = %err,
                        "failed to set TCP_NODELAY on origin stream"
                    );
                }
                debug!(host = %addr.ip(), port = addr.port(), "connected to origin");
                return Ok((stream, *addr));
            }
            Ok(Err(err)) => {
                last_err = Some(anyhow::Error::new(err).context(format!("failed to connect to {addr}")));
            }
            Err(_) => {
                last_err = Some(anyhow!("connection to {addr} timed out"));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("no addresses resolved for origin")))
}
