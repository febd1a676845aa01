//! Durable store abstraction.
//!
//! The queue owns no state of its own; everything lives behind this trait so
//! multiple worker processes can share one store. `RedisStore` is the
//! production implementation, `MemoryStore` the in-process fake for tests.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::error::MailerError;
use async_trait::async_trait;

/// Key-value store with list, set, and expiring-key primitives.
///
/// Contract notes:
/// - `set_nx_ex` is an atomic create-if-absent; exactly one of N concurrent
///   callers for the same key observes `true`.
/// - `list_remove` removes the first occurrence and reports how many entries
///   it removed; a removal count of zero means another caller got there
///   first. This is the conditional that makes queue leasing race-free.
/// - `incr` is an atomic counter increment, starting from zero.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Read a value. Expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, MailerError>;

    /// Write a value without expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), MailerError>;

    /// Write a value with a TTL in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), MailerError>;

    /// Write a value with a TTL only if the key does not exist. Returns
    /// whether the write happened.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64)
        -> Result<bool, MailerError>;

    /// Delete a key. Deleting an absent key is a no-op.
    async fn del(&self, key: &str) -> Result<(), MailerError>;

    /// Atomically increment a counter, returning the new value.
    async fn incr(&self, key: &str) -> Result<i64, MailerError>;

    /// Append a value to the tail of a list.
    async fn list_push_back(&self, key: &str, value: &str) -> Result<(), MailerError>;

    /// Read a list slice. Negative indices count from the tail, as in Redis
    /// `LRANGE`.
    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, MailerError>;

    /// Remove the first occurrence of a value, returning the removal count.
    async fn list_remove(&self, key: &str, value: &str) -> Result<usize, MailerError>;

    /// List length.
    async fn list_len(&self, key: &str) -> Result<usize, MailerError>;

    /// Add a member to a set. Returns whether it was newly added.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, MailerError>;

    /// Remove a member from a set. Returns whether it was present.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, MailerError>;

    /// Set cardinality.
    async fn set_len(&self, key: &str) -> Result<usize, MailerError>;

    /// All members of a set, in no particular order.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, MailerError>;
}
