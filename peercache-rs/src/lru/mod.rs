//! Provides a memory constrained LRU Cache.
//!
//! An LRU cache drops the least recently used entries once it is about to grow beyond the given
//! amount of memory. Each entry is charged with the length of its key plus the size of its value
//! as reported by the [ByteSize](ByteSize) trait.
//!
//! [LRUCache](LRUCache) itself is a plain, unsynchronized data structure. The [cache](cache)
//! module wraps it into a mutex so that it can be shared by all tasks serving a
//! [Group](crate::group::Group).
pub mod cache;
mod lru_cache;

pub use lru_cache::ByteSize;
pub use lru_cache::EvictionHandler;
pub use lru_cache::LRUCache;
