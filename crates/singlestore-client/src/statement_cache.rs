//! Prepared statement caching with LRU eviction.
//!
//! ## Lifecycle
//!
//! 1. The first prepare of a command sends `COM_STMT_PREPARE` for each of its
//!    statements and caches the result under the command text
//! 2. Later prepares of the same text are served from the cache
//! 3. When the cache is full the least recently used entry is evicted and the
//!    session closes its statements with `COM_STMT_CLOSE`
//! 4. A connection reset clears the cache without contacting the server,
//!    since the server has already dropped every statement

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::preparer::PreparedStatements;

/// LRU cache of prepared statements keyed by command text.
pub struct StatementCache {
    cache: LruCache<String, Arc<PreparedStatements>>,
    hits: u64,
    misses: u64,
}

impl StatementCache {
    /// Create a cache holding at most `max_size` commands; `0` means unbounded.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let cache = match NonZeroUsize::new(max_size) {
            Some(size) => LruCache::new(size),
            None => LruCache::unbounded(),
        };
        Self {
            cache,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up the statements prepared for `command_text`, updating LRU order.
    pub fn get(&mut self, command_text: &str) -> Option<Arc<PreparedStatements>> {
        if let Some(statements) = self.cache.get(command_text) {
            self.hits += 1;
            tracing::trace!(sql = command_text, "statement cache hit");
            Some(Arc::clone(statements))
        } else {
            self.misses += 1;
            tracing::trace!(sql = command_text, "statement cache miss");
            None
        }
    }

    /// Cache `statements` for `command_text`.
    ///
    /// Returns the entry displaced to make room (or replaced under the same
    /// text), whose statements the caller must close on the server.
    pub fn insert(
        &mut self,
        command_text: String,
        statements: Arc<PreparedStatements>,
    ) -> Option<Arc<PreparedStatements>> {
        tracing::debug!(
            sql = %command_text,
            count = statements.len(),
            "caching prepared statements"
        );
        self.cache
            .push(command_text, statements)
            .map(|(_, displaced)| displaced)
    }

    /// Remove the entry for `command_text`.
    pub fn remove(&mut self, command_text: &str) -> Option<Arc<PreparedStatements>> {
        self.cache.pop(command_text)
    }

    /// Forget every entry without closing anything.
    pub fn clear(&mut self) {
        let count = self.cache.len();
        self.cache.clear();
        if count > 0 {
            tracing::debug!(count, "cleared statement cache");
        }
    }

    /// Number of cached commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Number of cache hits.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of cache misses.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

impl std::fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementCache")
            .field("len", &self.cache.len())
            .field("cap", &self.cache.cap())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}
