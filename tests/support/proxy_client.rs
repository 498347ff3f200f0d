use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::{read_http_response, read_response_bytes};

pub struct ProxyClient {
    stream: TcpStream,
}

impl ProxyClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
        })
    }

    pub async fn send(&mut self, request: impl AsRef<[u8]>) -> Result<()> {
        self.stream.write_all(request.as_ref()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Sends `request` and returns everything the proxy writes before closing.
    pub async fn exchange(mut self, request: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        self.send(request).await?;
        read_response_bytes(&mut self.stream).await
    }

    pub async fn read_response(&mut self) -> Result<String> {
        read_http_response(&mut self.stream).await
    }

    pub async fn shutdown(mut self) {
        self.stream.shutdown().await.ok();
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}
