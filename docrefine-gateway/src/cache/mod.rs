//! Response caching.
//!
//! A bounded in-process tier fronts a shared key-value store; see
//! [`tiered::TieredCache`] for the read/write contract. The store side is
//! pluggable through [`docrefine_core::traits::CacheStore`], with
//! [`store::InMemoryStore`] as the single-node default.

pub mod memory;
pub mod store;
pub mod tiered;

pub use memory::{MemoryCache, MemoryCacheConfig};
pub use store::InMemoryStore;
pub use tiered::{CacheStats, TieredCache, TieredCacheConfig};
