//! The offline response cache for tax engine GETs.
//!
//! This is the server-side counterpart of a browser service worker: URL-keyed
//! byte-for-byte snapshots of prior responses, invalidated only by bumping the
//! cache version, and served through one explicit, named strategy per route.

mod store;
mod strategy;

pub use store::{
    CACHE_VERSION, CachedResponse, create_response_cache_table, lookup, purge_stale_versions,
    store,
};
pub use strategy::{CacheStrategy, CachedFetch, Freshness, fetch_through_cache, strategy_for};
