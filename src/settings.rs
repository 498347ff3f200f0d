use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};
use crate::proxy::http::codec::MessageLimits;

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8888))
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_upstream_connect_timeout() -> u64 {
    5
}

fn default_max_header_size() -> usize {
    32 * 1024
}

fn default_max_body_size() -> usize {
    64 * 1024 * 1024
}

fn default_relay_chunk_size() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout: u64,
    /// Overall per-request deadline in seconds; zero disables it.
    #[serde(default)]
    pub request_timeout: u64,
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default = "default_relay_chunk_size")]
    pub relay_chunk_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            cache_dir: default_cache_dir(),
            log: default_log_format(),
            poll_interval_ms: default_poll_interval_ms(),
            upstream_connect_timeout: default_upstream_connect_timeout(),
            request_timeout: 0,
            max_header_size: default_max_header_size(),
            max_body_size: default_max_body_size(),
            relay_chunk_size: default_relay_chunk_size(),
        }
    }
}

impl Settings {
    /// Layers the optional config file, `PROXYCACHE__*` environment variables and
    /// command-line overrides, in that order.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = resolve_config_path(cli);

        if let Some(path) = &config_path {
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("PROXYCACHE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        if let Some(path) = &config_path {
            settings.apply_base_dir(path);
        }
        settings.apply_cli_overrides(cli);
        settings.validate()?;
        Ok(settings)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout > 0).then(|| Duration::from_secs(self.request_timeout))
    }

    pub fn message_limits(&self) -> MessageLimits {
        MessageLimits {
            max_header_bytes: self.max_header_size,
            max_body_bytes: self.max_body_size,
        }
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        self.cache_dir = absolutize(&self.cache_dir, base_dir);
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(listen) = cli.listen {
            self.listen = listen;
        }
        if let Some(cache_dir) = &cli.cache_dir {
            self.cache_dir = cache_dir.clone();
        }
        if let Some(log) = cli.log {
            self.log = log;
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.cache_dir.as_os_str().is_empty(),
            "cache_dir must not be empty"
        );
        ensure!(
            self.poll_interval_ms > 0,
            "poll_interval_ms must be greater than 0 (got {})",
            self.poll_interval_ms
        );
        ensure!(
            self.upstream_connect_timeout > 0,
            "upstream_connect_timeout must be greater than 0 seconds (got {})",
            self.upstream_connect_timeout
        );
        ensure!(
            self.max_header_size > 0,
            "max_header_size must be greater than 0 (got {})",
            self.max_header_size
        );
        ensure!(
            self.max_body_size > 0,
            "max_body_size must be greater than 0 (got {})",
            self.max_body_size
        );
        ensure!(
            self.relay_chunk_size > 0,
            "relay_chunk_size must be greater than 0 (got {})",
            self.relay_chunk_size
        );
        Ok(())
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = &cli.config {
        return Some(path.clone());
    }
    let candidate = PathBuf::from("proxycache.toml");
    candidate.exists().then_some(candidate)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
