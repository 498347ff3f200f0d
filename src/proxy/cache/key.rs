use std::path::{Component, Path};

/// Directory under the cache root holding in-progress writes.
pub(super) const PARTIAL_DIR: &str = ".partial";

/// A request filename normalized into a path relative to the cache root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheKey {
    relative: String,
}

impl CacheKey {
    /// Strips surrounding `/` from a request filename. Returns `None` for keys that would be
    /// empty, climb out of the cache root, or land in the partial-write directory.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let relative = filename.trim_matches('/');
        if relative.is_empty() {
            return None;
        }
        let mut components = Path::new(relative).components();
        if let Some(Component::Normal(first)) = components.clone().next()
            && first == PARTIAL_DIR
        {
            return None;
        }
        if !components.all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(Self {
            relative: relative.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.relative
    }
}
