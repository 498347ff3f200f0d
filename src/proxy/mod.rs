pub mod cache;
pub mod error;
pub mod http;
pub mod listener;
pub mod target;
pub mod upstream;

use std::sync::Arc;

use crate::io_util::Shutdown;
use crate::settings::Settings;

/// Shared state handed to every connection task.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub cache: Arc<cache::CacheStore>,
    pub shutdown: Shutdown,
}

impl AppContext {
    pub fn new(settings: Arc<Settings>, cache: Arc<cache::CacheStore>, shutdown: Shutdown) -> Self {
        Self {
            settings,
            cache,
            shutdown,
        }
    }
}
