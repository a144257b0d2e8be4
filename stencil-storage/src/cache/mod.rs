//! Template cache with write-invalidation and guarded read-through fills.
//!
//! Writers never refresh the cache. A successful commit deletes the entry and
//! the next reader repopulates it from the store. Because that reader's store
//! read can race with a later commit, population goes through a
//! [`FillTicket`]: the ticket captures the invalidation stamp before the store
//! read, and the fill is refused if the key was invalidated in between.
//!
//! # Example
//!
//! ```ignore
//! let cache = ReadThroughCache::new(Arc::new(InMemoryCache::new(config, clock)));
//!
//! // Accept a snapshot up to 30s old
//! let read = cache
//!     .get(&id, Freshness::best_effort(Duration::from_secs(30)), &store)
//!     .await?;
//!
//! // Bypass the cache entirely
//! let read = cache.get(&id, Freshness::Consistent, &store).await?;
//! ```

pub mod freshness;
pub mod memory;
pub mod read_through;
pub mod traits;

pub use freshness::{CacheRead, Freshness};
pub use memory::{InMemoryCache, MAX_TOMBSTONES};
pub use read_through::ReadThroughCache;
pub use traits::{CacheBackend, CacheEntry, CacheStats, FillTicket};
