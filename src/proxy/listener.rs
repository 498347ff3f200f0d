use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::io_util::Interruptible;
use crate::proxy::error::{Cancelled, classify_proxy_error, log_proxy_error};

use super::{AppContext, http};

pub async fn bind_listener(bind_addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {bind_addr}"))
}

/// Accepts until shutdown, one task per connection. On shutdown the listener is closed and
/// connections still in flight are aborted.
pub async fn serve(listener: TcpListener, app: AppContext) -> Result<()> {
    let local_addr = listener.local_addr().context("listener has no local address")?;
    info!(address = %local_addr, "proxy listener started");

    let io = Interruptible::new(app.shutdown.clone(), app.settings.poll_interval());
    let mut connections = JoinSet::new();
    loop {
        while connections.try_join_next().is_some() {}

        let (stream, peer_addr) = match io.run(listener.accept(), "accepting connection").await {
            Ok(pair) => pair,
            Err(err) if err.downcast_ref::<Cancelled>().is_some() => break,
            Err(err) => {
                error!(error = ?err, "failed to accept incoming connection");
                continue;
            }
        };
        debug!(peer = %peer_addr, "accepted connection");
        if let Err(err) = stream.set_nodelay(true) {
            debug!(peer = %peer_addr, error = %err, "failed to set TCP_NODELAY on client stream");
        }
        connections.spawn(handle_connection(stream, peer_addr, app.clone()));
    }

    drop(listener);
    let in_flight = connections.len();
    connections.shutdown().await;
    info!(address = %local_addr, in_flight, "proxy listener stopped");
    Ok(())
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, app: AppContext) {
    if let Err(err) = http::handle_http(stream, peer, app).await {
        let kind = classify_proxy_error(&err);
        log_proxy_error(&kind, peer, "-", &err);
    }
}
