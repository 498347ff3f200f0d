use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Error;
use thiserror::Error;
use tracing::{debug, info, warn};

/// An HTTP message whose headline, header section or body could not be read.
#[derive(Debug, Error)]
#[error("malformed HTTP message: {reason}")]
pub struct MalformedMessage {
    pub reason: String,
}

impl MalformedMessage {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to connect to origin {host}:{port}")]
pub struct OriginConnectError {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error)]
#[error("cache {operation} failed for {}", path.display())]
pub struct CacheIoError {
    pub operation: &'static str,
    pub path: PathBuf,
}

impl CacheIoError {
    pub fn new(operation: &'static str, path: impl Into<PathBuf>) -> Self {
        Self {
            operation,
            path: path.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("shutdown requested")]
pub struct Cancelled;

/// Normalized classification of per-connection failures.
pub enum ProxyErrorKind<'a> {
    Malformed(&'a MalformedMessage),
    OriginConnect(&'a OriginConnectError),
    CacheIo(&'a CacheIoError),
    Cancelled,
    Other,
}

impl ProxyErrorKind<'_> {
    pub fn reason(&self) -> &'static str {
        match self {
            ProxyErrorKind::Malformed(_) => "malformed_message",
            ProxyErrorKind::OriginConnect(_) => "origin_connect",
            ProxyErrorKind::CacheIo(_) => "cache_io",
            ProxyErrorKind::Cancelled => "cancelled",
            ProxyErrorKind::Other => "io",
        }
    }
}

pub fn classify_proxy_error(err: &Error) -> ProxyErrorKind<'_> {
    if err.downcast_ref::<Cancelled>().is_some() {
        ProxyErrorKind::Cancelled
    } else if let Some(malformed) = err.downcast_ref::<MalformedMessage>() {
        ProxyErrorKind::Malformed(malformed)
    } else if let Some(connect) = err.downcast_ref::<OriginConnectError>() {
        ProxyErrorKind::OriginConnect(connect)
    } else if let Some(cache) = err.downcast_ref::<CacheIoError>() {
        ProxyErrorKind::CacheIo(cache)
    } else {
        ProxyErrorKind::Other
    }
}

pub fn log_proxy_error(kind: &ProxyErrorKind<'_>, peer: SocketAddr, host: &str, err: &Error) {
    match kind {
        ProxyErrorKind::Malformed(malformed) => debug!(
            peer = %peer,
            reason = %malformed.reason,
            "dropping connection with malformed message"
        ),
        ProxyErrorKind::OriginConnect(connect) => warn!(
            peer = %peer,
            host = %connect.host,
            port = connect.port,
            error = ?err,
            "origin connection failed"
        ),
        ProxyErrorKind::CacheIo(cache) => warn!(
            peer = %peer,
            host,
            path = %cache.path.display(),
            operation = cache.operation,
            error = ?err,
            "cache operation failed"
        ),
        ProxyErrorKind::Cancelled => info!(peer = %peer, host, "connection abandoned for shutdown"),
        ProxyErrorKind::Other => warn!(
            peer = %peer,
            host,
            error = %err,
            "proxy request failed"
        ),
    }
}
