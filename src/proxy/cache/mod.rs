mod key;
mod reader;
mod store;
mod writer;

pub use key::CacheKey;
pub use reader::serve_cached;
pub use store::CacheStore;
pub use writer::CacheWriter;

/// Outcome of the cache check for one request, as reported in the access log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
    /// The request filename cannot be stored under the cache root.
    Bypass,
}

impl CacheLookup {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLookup::Hit => "hit",
            CacheLookup::Miss => "miss",
            CacheLookup::Bypass => "bypass",
        }
    }
}

/// What happened to the cache copy of a relayed response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStoreOutcome {
    Stored,
    /// Caching was not attempted.
    Skipped,
    /// The relay failed, so the partial copy was thrown away.
    Discarded,
    Failed,
}

impl CacheStoreOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStoreOutcome::Stored => "stored",
            CacheStoreOutcome::Skipped => "skipped",
            CacheStoreOutcome::Discarded => "discarded",
            CacheStoreOutcome::Failed => "failed",
        }
    }
}
