use crate::tokens::TokenMapping;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Entries live until the cache is dropped.
    Persistent,
    /// Entries are evicted as soon as they have been delivered, so every
    /// request transforms the file again.
    Live,
}

/// Token mappings of already transformed files, keyed by absolute path.
pub struct TokenCache {
    policy: CachePolicy,
    entries: Mutex<AHashMap<PathBuf, Arc<TokenMapping>>>,
}

impl TokenCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(AHashMap::new()),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn get(&self, path: &Path) -> Option<Arc<TokenMapping>> {
        self.entries.lock().get(path).cloned()
    }

    pub fn put(&self, path: &Path, tokens: Arc<TokenMapping>) {
        self.entries.lock().insert(path.to_path_buf(), tokens);
    }

    pub fn invalidate(&self, path: &Path) -> Option<Arc<TokenMapping>> {
        self.entries.lock().remove(path)
    }

    /// Records a freshly fetched mapping according to the cache policy.
    pub fn commit(&self, path: &Path, tokens: Arc<TokenMapping>) {
        match self.policy {
            CachePolicy::Persistent => self.put(path, tokens),
            CachePolicy::Live => {
                self.invalidate(path);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
