//! Key/value cache collaborator
//!
//! The service only needs four operations from its cache: get, set with a
//! TTL, delete, and prefix delete. `MemoryCache` is the in-process backend;
//! shared stores plug in by implementing `CacheStore`.

pub mod memory;

pub use memory::MemoryCache;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live (non-expired) value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value that expires after `ttl`
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key starting with `prefix`, returning how many were removed
    async fn delete_by_pattern(&self, prefix: &str) -> Result<usize>;
}
