use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use http::StatusCode;
use time::OffsetDateTime;
use tracing::field::display;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::cli::LogFormat;
use crate::proxy::cache::{CacheLookup, CacheStoreOutcome};

const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let output: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .boxed(),
        LogFormat::Text => fmt::layer().compact().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .context("failed to install log subscriber")
}

/// Collects the fields of one access-log record; [`AccessLogBuilder::log`] emits it on the
/// `access_log` target.
#[derive(Debug)]
pub struct AccessLogBuilder {
    peer: SocketAddr,
    method: String,
    host: String,
    path: String,
    lookup: Option<CacheLookup>,
    store: Option<CacheStoreOutcome>,
    status: Option<StatusCode>,
    bytes_in: u64,
    bytes_out: u64,
    elapsed: Duration,
    upstream: Option<SocketAddr>,
    error: Option<(&'static str, String)>,
}

impl AccessLogBuilder {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            method: String::new(),
            host: String::new(),
            path: String::new(),
            lookup: None,
            store: None,
            status: None,
            bytes_in: 0,
            bytes_out: 0,
            elapsed: Duration::ZERO,
            upstream: None,
            error: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn cache_lookup(mut self, lookup: CacheLookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn cache_store(mut self, outcome: CacheStoreOutcome) -> Self {
        self.store = Some(outcome);
        self
    }

    /// Takes the status from a response status line when it carries a valid code.
    pub fn status_line(mut self, status_line: Option<&str>) -> Self {
        self.status = status_line.and_then(parse_status_code);
        self
    }

    pub fn bytes(mut self, in_bytes: u64, out_bytes: u64) -> Self {
        self.bytes_in = in_bytes;
        self.bytes_out = out_bytes;
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn upstream_addr(mut self, addr: SocketAddr) -> Self {
        self.upstream = Some(addr);
        self
    }

    pub fn error(mut self, reason: &'static str, detail: impl Into<String>) -> Self {
        self.error = Some((reason, detail.into()));
        self
    }

    pub fn log(self) {
        let (error_reason, error_detail) = match &self.error {
            Some((reason, detail)) => (Some(*reason), Some(detail.as_str())),
            None => (None, None),
        };
        tracing::info!(
            target: "access_log",
            ts = access_timestamp(OffsetDateTime::now_utc()),
            client_ip = %self.peer.ip(),
            client_port = self.peer.port(),
            method = self.method,
            host = self.host,
            path = self.path,
            cache_lookup = self.lookup.as_ref().map(CacheLookup::as_str),
            cache_store = self.store.as_ref().map(CacheStoreOutcome::as_str),
            status = self.status.map(|status| status.as_u16()),
            bytes_in = self.bytes_in,
            bytes_out = self.bytes_out,
            elapsed_ms = self.elapsed.as_millis(),
            upstream_addr = self.upstream.map(display),
            error_reason,
            error_detail,
        );
    }
}

fn parse_status_code(status_line: &str) -> Option<StatusCode> {
    let code = status_line.split_whitespace().nth(1)?;
    StatusCode::from_bytes(code.as_bytes()).ok()
}

/// UTC, millisecond precision: `2023-11-14T22:13:20.123Z`.
fn access_timestamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.millisecond()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferWriter {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buf.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(builder: AccessLogBuilder) -> String {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BufferWriter {
                buf: buffer.clone(),
            })
            .with_ansi(false)
            .without_time()
            .compact()
            .finish();
        tracing::subscriber::with_default(subscriber, || builder.log());
        let output = buffer.lock().unwrap().clone();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn access_log_includes_cache_fields() {
        let peer: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        let output = capture(
            AccessLogBuilder::new(peer)
                .method("GET")
                .host("example.com")
                .path("example.com/resource")
                .status_line(Some("HTTP/1.1 200 OK"))
                .cache_lookup(CacheLookup::Miss)
                .cache_store(CacheStoreOutcome::Stored),
        );

        assert!(output.contains("access_log"), "{output}");
        assert!(output.contains("cache_lookup=\"miss\""), "{output}");
        assert!(output.contains("cache_store=\"stored\""), "{output}");
        assert!(output.contains("status=200"), "{output}");
        assert!(output.contains("client_port=12345"), "{output}");
    }

    #[test]
    fn failed_request_carries_error_fields() {
        let peer: SocketAddr = "10.0.0.2:40000".parse().unwrap();
        let upstream: SocketAddr = "192.0.2.7:80".parse().unwrap();
        let output = capture(
            AccessLogBuilder::new(peer)
                .upstream_addr(upstream)
                .error("origin_connect", "connection refused"),
        );

        assert!(output.contains("upstream_addr=192.0.2.7:80"), "{output}");
        assert!(output.contains("error_reason=\"origin_connect\""), "{output}");
        assert!(output.contains("connection refused"), "{output}");
    }

    #[test]
    fn status_line_without_code_leaves_status_unset() {
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let status = |line| AccessLogBuilder::new(peer).status_line(line).status;
        assert_eq!(status(Some("HTTP/1.1 abc")), None);
        assert_eq!(status(None), None);
        assert_eq!(
            status(Some("HTTP/1.0 404 Not Found")),
            Some(StatusCode::NOT_FOUND)
        );
    }

    #[test]
    fn timestamp_is_utc_with_milliseconds() {
        let at = OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_123_000_000).unwrap();
        assert_eq!(access_timestamp(at), "2023-11-14T22:13:20.123Z");
    }
}
