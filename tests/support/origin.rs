use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::read_until_double_crlf;

#[derive(Clone)]
enum OriginBehavior {
    /// Read the request, write these bytes, close.
    Respond(Arc<Vec<u8>>),
    /// Read the request and close without answering.
    Close,
}

/// Minimal origin server that counts requests and records what the proxy sent it.
pub struct TestOrigin {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    handle: JoinHandle<()>,
}

impl TestOrigin {
    pub async fn respond(response: impl Into<Vec<u8>>) -> Result<Self> {
        Self::spawn(OriginBehavior::Respond(Arc::new(response.into()))).await
    }

    pub async fn http_ok(body: &str) -> Result<Self> {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        Self::respond(response.into_bytes()).await
    }

    pub async fn close() -> Result<Self> {
        Self::spawn(OriginBehavior::Close).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Raw bytes of every request received, in arrival order.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    pub fn last_request_text(&self) -> Option<String> {
        self.requests()
            .last()
            .map(|raw| String::from_utf8_lossy(raw).to_string())
    }

    async fn spawn(behavior: OriginBehavior) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let accepted = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handle = {
            let accepted = accepted.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                loop {
                    let (stream, _) = match listener.accept().await {
                        Ok(conn) => conn,
                        Err(_) => break,
                    };
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let behavior = behavior.clone();
                    let requests = requests.clone();
                    tokio::spawn(async move {
                        let _ = handle_connection(stream, behavior, requests).await;
                    });
                }
            })
        };
        Ok(Self {
            addr,
            accepted,
            requests,
            handle,
        })
    }
}

impl Drop for TestOrigin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    behavior: OriginBehavior,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
) -> Result<()> {
    let mut request = read_until_double_crlf(&mut stream).await?;
    let body_len = content_length(&request);
    if body_len > 0 {
        let mut body = vec![0u8; body_len];
        stream.read_exact(&mut body).await?;
        request.extend_from_slice(&body);
    }
    requests
        .lock()
        .unwrap_or_else(|err| err.into_inner())
        .push(request);

    if let OriginBehavior::Respond(response) = behavior {
        stream.write_all(&response).await?;
    }
    stream.shutdown().await.ok();
    Ok(())
}

fn content_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .filter_map(|(_, value)| value.trim().parse().ok())
        .last()
        .unwrap_or(0)
}
