use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{trace, warn};

use crate::proxy::error::Cancelled;

/// Process-wide cancellation signal shared by the accept loop and every connection task.
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Resolves once `trigger` has been called, immediately if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs blocking-style socket and file operations as a series of bounded waits.
///
/// Each wait lasts at most `poll_interval`; between waits the optional deadline is checked, and
/// the shutdown signal is raced against the operation the whole time. The operation itself is
/// never dropped between waits, so no data is lost to a wake-up.
#[derive(Clone, Debug)]
pub struct Interruptible {
    shutdown: Shutdown,
    poll_interval: Duration,
    deadline: Option<Instant>,
}

impl Interruptible {
    pub fn new(shutdown: Shutdown, poll_interval: Duration) -> Self {
        Self {
            shutdown,
            poll_interval,
            deadline: None,
        }
    }

    /// Returns a copy that fails any wait still pending `timeout` from now.
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        Self {
            shutdown: self.shutdown.clone(),
            poll_interval: self.poll_interval,
            deadline: timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub async fn run<F, T, E>(&self, future: F, context: &str) -> Result<T>
    where
        F: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        tokio::pin!(future);
        let mut waits = 0u64;
        loop {
            let wait = self.next_wait(context)?;
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(Cancelled.into()),
                result = &mut future => {
                    return result.with_context(|| format!("failed while {context}"));
                }
                _ = sleep(wait) => {
                    waits += 1;
                    trace!(waits, context, "still waiting");
                }
            }
        }
    }

    fn next_wait(&self, context: &str) -> Result<Duration> {
        match self.deadline {
            None => Ok(self.poll_interval),
            Some(deadline) => {
                let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                    bail!("timed out {context}");
                };
                if remaining.is_zero() {
                    bail!("timed out {context}");
                }
                Ok(remaining.min(self.poll_interval))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeeCacheState {
    Disabled,
    Active,
    Failed,
}

/// Fans bytes out to the client and, best effort, to a cache sink.
///
/// Client write failures are returned to the caller. A cache write failure drops the cache sink
/// and the remaining bytes go to the client only.
pub struct TeeWriter<'a, C, K> {
    client: &'a mut C,
    cache: Option<K>,
    state: TeeCacheState,
    written: u64,
}

impl<'a, C, K> TeeWriter<'a, C, K>
where
    C: AsyncWrite + Unpin,
    K: AsyncWrite + Unpin,
{
    pub fn new(client: &'a mut C, cache: Option<K>) -> Self {
        let state = if cache.is_some() {
            TeeCacheState::Active
        } else {
            TeeCacheState::Disabled
        };
        Self {
            client,
            cache,
            state,
            written: 0,
        }
    }

    pub async fn write_all(&mut self, buf: &[u8], io: &Interruptible) -> Result<()> {
        io.run(self.client.write_all(buf), "writing response to client")
            .await?;
        self.written = self.written.saturating_add(buf.len() as u64);
        if let Some(cache) = self.cache.as_mut()
            && let Err(err) = cache.write_all(buf).await
        {
            warn!(error = %err, "cache write failed; continuing without cache");
            self.cache = None;
            self.state = TeeCacheState::Failed;
        }
        Ok(())
    }

    pub async fn flush(&mut self, io: &Interruptible) -> Result<()> {
        io.run(self.client.flush(), "flushing response to client")
            .await
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Hands back the cache sink if it is still healthy.
    pub fn into_cache(self) -> (Option<K>, TeeCacheState) {
        (self.cache, self.state)
    }
}
