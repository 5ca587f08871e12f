//! Two-level TTL cache for upstream market data.
//!
//! Entries live in an in-process map and, when a pool is attached, in a
//! SQLite table so they survive restarts. Expiry is wall-clock: an entry is
//! stale once `stored_at + ttl` has passed. There is no other invalidation
//! protocol beyond explicit admin deletes, and concurrent writers simply
//! overwrite each other.

pub mod keys;
mod store;

pub use keys::{bars_key, bars_prefix, news_key, quote_key};
pub use store::{open_sqlite_pool, Cached, CacheStats, PriceCache};
