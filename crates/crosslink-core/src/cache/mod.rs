//! Durable TTL + size-bounded cache shared by all invocations.
//!
//! Ticket and document context fetched from external services is cached
//! here so repeated scans against the same project stay cheap. All
//! invocations against one repository share a single SQLite database with
//! namespace-based isolation (one namespace per resource type).

mod key;
mod sqlite;
mod traits;

pub use key::query_fingerprint;
pub use sqlite::SqliteCache;
pub use traits::{CacheBackend, CacheEntry, CacheStats};
