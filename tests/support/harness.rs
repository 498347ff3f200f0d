use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use proxycache::{io_util::Shutdown, proxy::listener::bind_listener, settings::Settings};

use super::net::wait_for_listener;
use super::proxy_client::ProxyClient;

fn default_test_settings(cache_dir: PathBuf) -> Settings {
    Settings {
        listen: SocketAddr::from(([127, 0, 0, 1], 0)),
        cache_dir,
        poll_interval_ms: 100,
        upstream_connect_timeout: 2,
        request_timeout: 10,
        ..Settings::default()
    }
}

pub struct ProxyHarness {
    _temp: TempDir,
    pub addr: SocketAddr,
    pub cache_dir: PathBuf,
    shutdown: Shutdown,
    handle: JoinHandle<Result<()>>,
}

impl ProxyHarness {
    pub async fn connect(&self) -> Result<TcpStream> {
        Ok(TcpStream::connect(self.addr).await?)
    }

    pub async fn client(&self) -> Result<ProxyClient> {
        ProxyClient::connect(self.addr).await
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the cache entry for a request filename such as `127.0.0.1:8080/foo.html`.
    pub fn cache_path(&self, filename: &str) -> PathBuf {
        self.cache_dir.join(filename.trim_matches('/'))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Triggers shutdown and waits for the accept loop to return.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.trigger();
        timeout(StdDuration::from_secs(5), self.handle)
            .await
            .context("proxy did not stop after shutdown")??
    }
}

#[derive(Default)]
pub struct ProxyHarnessBuilder {
    settings_override: Option<Box<dyn FnOnce(&mut Settings) + Send>>,
}

impl ProxyHarnessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings<F>(mut self, func: F) -> Self
    where
        F: FnOnce(&mut Settings) + Send + 'static,
    {
        self.settings_override = Some(Box::new(func));
        self
    }

    pub async fn spawn(mut self) -> Result<ProxyHarness> {
        let temp = TempDir::new()?;
        let mut settings = default_test_settings(temp.path().join("cache"));
        if let Some(override_fn) = self.settings_override.take() {
            override_fn(&mut settings);
        }
        let cache_dir = settings.cache_dir.clone();

        let listener = bind_listener(settings.listen).await?;
        let addr = listener.local_addr()?;
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(proxycache::run_with_listener(
            listener,
            settings,
            shutdown.clone(),
        ));

        wait_for_listener(addr).await?;

        Ok(ProxyHarness {
            _temp: temp,
            addr,
            cache_dir,
            shutdown,
            handle,
        })
    }
}
