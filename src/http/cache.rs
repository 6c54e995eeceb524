//! Response cache collaborator.
//!
//! Persistence is left to the caller; the client only needs `get` and `put`.

use async_trait::async_trait;
use dashmap::DashMap;

/// Storage for raw response bodies keyed by URL.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Returns the cached body for `url`, or `None` on a miss.
    async fn get(&self, url: &str) -> Option<Vec<u8>>;

    /// Stores the body fetched from `url`.
    async fn put(&self, url: &str, body: &[u8]);
}

/// Process-local cache, useful for tests and repeated runs in one process.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, url: &str) -> Option<Vec<u8>> {
        self.entries.get(url).map(|entry| entry.value().clone())
    }

    async fn put(&self, url: &str, body: &[u8]) {
        self.entries.insert(url.to_string(), body.to_vec());
    }
}
