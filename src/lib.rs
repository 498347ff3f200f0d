pub mod cli;
pub mod io_util;
pub mod logging;
pub mod proxy;
pub mod settings;
pub mod util;

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::io_util::Shutdown;
use crate::proxy::cache::CacheStore;
use crate::settings::Settings;

/// Runs the proxy until Ctrl-C.
pub async fn run(settings: Settings) -> Result<()> {
    let shutdown = Shutdown::new();
    spawn_ctrl_c_task(shutdown.clone());
    let listener = proxy::listener::bind_listener(settings.listen).await?;
    run_with_listener(listener, settings, shutdown).await
}

/// Runs the proxy on an already bound listener until `shutdown` is triggered.
pub async fn run_with_listener(
    listener: TcpListener,
    settings: Settings,
    shutdown: Shutdown,
) -> Result<()> {
    let cache = Arc::new(CacheStore::prepare(settings.cache_dir.clone()).await?);
    let app = proxy::AppContext::new(Arc::new(settings), cache, shutdown);
    proxy::listener::serve(listener, app).await
}

fn spawn_ctrl_c_task(shutdown: Shutdown) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl-C; shutting down");
                shutdown.trigger();
            }
            Err(err) => error!(error = %err, "failed to install Ctrl-C handler"),
        }
    });
}
