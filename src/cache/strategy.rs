//! Per-route caching strategies for tax engine GETs.
//!
//! Each route prefix maps to exactly one named strategy, chosen here at
//! the routing-table level rather than varying between deployments:
//!
//! - `/prep/template` (versioned reference data): Cache-First.
//! - `/tax/estimate` (derived figures): Stale-While-Revalidate.
//! - everything else (mutable record data): Network-First, with the
//!   cache as the offline fallback only.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use time::OffsetDateTime;

use crate::{
    Error,
    backend::BackendClient,
    cache::store::{lookup, store},
};

/// The named caching strategies, one per route prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Serve from cache when possible; only fetch on a miss.
    CacheFirst,
    /// Always fetch; fall back to the cache when the engine is unreachable.
    NetworkFirst,
    /// Serve the cached copy immediately and refresh the cache in the
    /// background.
    StaleWhileRevalidate,
}

/// The strategy for a tax engine path.
pub fn strategy_for(path: &str) -> CacheStrategy {
    if path.starts_with("/prep/template") {
        CacheStrategy::CacheFirst
    } else if path.starts_with("/tax/estimate") {
        CacheStrategy::StaleWhileRevalidate
    } else {
        CacheStrategy::NetworkFirst
    }
}

/// Where a fetched document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Fetched from the engine during this call.
    Network,
    /// Served from the response cache.
    Cache,
}

/// A document fetched through the cache layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFetch {
    /// The response body bytes.
    pub body: Vec<u8>,
    /// The content type of the body.
    pub content_type: String,
    /// Whether the body came from the network or the cache. Pages use
    /// this to tell the user they are looking at cached figures.
    pub served_from: Freshness,
    /// When the served snapshot was taken, for cache-served responses.
    pub cached_at: Option<OffsetDateTime>,
}

/// Fetch `path` from the tax engine through the strategy configured for
/// that route.
///
/// # Errors
/// Returns the underlying fetch error when the strategy has no cached
/// copy to fall back on, or an [Error::SqlError]/[Error::DatabaseLockError]
/// if the cache itself fails.
pub async fn fetch_through_cache(
    client: &BackendClient,
    db_connection: &Arc<Mutex<Connection>>,
    path: &str,
) -> Result<CachedFetch, Error> {
    match strategy_for(path) {
        CacheStrategy::CacheFirst => fetch_cache_first(client, db_connection, path).await,
        CacheStrategy::NetworkFirst => fetch_network_first(client, db_connection, path).await,
        CacheStrategy::StaleWhileRevalidate => {
            fetch_stale_while_revalidate(client, db_connection, path).await
        }
    }
}

async fn fetch_cache_first(
    client: &BackendClient,
    db_connection: &Arc<Mutex<Connection>>,
    path: &str,
) -> Result<CachedFetch, Error> {
    if let Some(cached) = lookup_cached(db_connection, path)? {
        return Ok(cached_fetch(cached));
    }

    fetch_and_cache(client, db_connection, path).await
}

async fn fetch_network_first(
    client: &BackendClient,
    db_connection: &Arc<Mutex<Connection>>,
    path: &str,
) -> Result<CachedFetch, Error> {
    match fetch_and_cache(client, db_connection, path).await {
        Ok(fetched) => Ok(fetched),
        Err(error) if error.is_transient() => {
            tracing::warn!("network fetch for {path} failed, checking the cache: {error}");

            match lookup_cached(db_connection, path)? {
                Some(cached) => Ok(cached_fetch(cached)),
                None => Err(error),
            }
        }
        Err(error) => Err(error),
    }
}

async fn fetch_stale_while_revalidate(
    client: &BackendClient,
    db_connection: &Arc<Mutex<Connection>>,
    path: &str,
) -> Result<CachedFetch, Error> {
    let Some(cached) = lookup_cached(db_connection, path)? else {
        // Nothing to serve yet, so this degenerates to a plain fetch.
        return fetch_and_cache(client, db_connection, path).await;
    };

    spawn_revalidation(client.clone(), db_connection.clone(), path.to_owned());

    Ok(cached_fetch(cached))
}

/// Refresh the cached copy of `path` without blocking the caller.
fn spawn_revalidation(client: BackendClient, db_connection: Arc<Mutex<Connection>>, path: String) {
    tokio::spawn(async move {
        let fetched = client.get_raw(&path).await;

        match fetched {
            Ok(response) => match db_connection.lock() {
                Ok(connection) => {
                    if let Err(error) = store(&path, &response, &connection) {
                        tracing::error!("could not store revalidated response for {path}: {error}");
                    }
                }
                Err(error) => {
                    tracing::error!("could not acquire database lock to revalidate {path}: {error}");
                }
            },
            Err(error) => {
                tracing::debug!("background revalidation of {path} failed: {error}");
            }
        }
    });
}

async fn fetch_and_cache(
    client: &BackendClient,
    db_connection: &Arc<Mutex<Connection>>,
    path: &str,
) -> Result<CachedFetch, Error> {
    let response = client.get_raw(path).await?;

    {
        let connection = db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;
        store(path, &response, &connection)?;
    }

    Ok(CachedFetch {
        body: response.body,
        content_type: response.content_type,
        served_from: Freshness::Network,
        cached_at: None,
    })
}

fn lookup_cached(
    db_connection: &Arc<Mutex<Connection>>,
    path: &str,
) -> Result<Option<crate::cache::store::CachedResponse>, Error> {
    let connection = db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    lookup(path, &connection)
}

fn cached_fetch(cached: crate::cache::store::CachedResponse) -> CachedFetch {
    CachedFetch {
        body: cached.body,
        content_type: cached.content_type,
        served_from: Freshness::Cache,
        cached_at: Some(cached.cached_at),
    }
}

#[cfg(test)]
mod strategy_tests {
    use std::{
        net::SocketAddr,
        sync::{
            Arc, Mutex,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    use axum::{Json, Router, extract::State, routing::get};
    use rusqlite::Connection;
    use serde_json::json;

    use crate::{
        backend::{BackendClient, RawResponse, RetryPolicy},
        cache::store::store,
        db::initialize,
    };

    use super::{CacheStrategy, Freshness, fetch_through_cache, strategy_for};

    fn get_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    async fn spawn_backend(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Could not bind test listener");
        let address = listener.local_addr().expect("Could not get local address");

        tokio::spawn(async move {
            axum::serve(listener, router)
                .await
                .expect("Test backend stopped unexpectedly");
        });

        address
    }

    fn fast_client(address: SocketAddr) -> BackendClient {
        BackendClient::new(
            &format!("http://{address}"),
            Duration::from_secs(2),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
        )
        .expect("Could not build client")
    }

    fn unreachable_client() -> BackendClient {
        // Port reserved then released, so connections are refused.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        fast_client(address)
    }

    fn counting_router(hits: Arc<AtomicU32>) -> Router {
        Router::new()
            .route(
                "/prep/template",
                get(|State(hits): State<Arc<AtomicU32>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"ok": true, "steps": []}))
                }),
            )
            .route(
                "/tax/estimate",
                get(|State(hits): State<Arc<AtomicU32>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"ok": true, "estimated_due_vat": 1000.0}))
                }),
            )
            .with_state(hits)
    }

    #[test]
    fn routing_table_is_fixed() {
        assert_eq!(strategy_for("/prep/template"), CacheStrategy::CacheFirst);
        assert_eq!(
            strategy_for("/prep/template?tax_type=VAT"),
            CacheStrategy::CacheFirst
        );
        assert_eq!(
            strategy_for("/tax/estimate?period=2025-09"),
            CacheStrategy::StaleWhileRevalidate
        );
        assert_eq!(strategy_for("/prep/refresh"), CacheStrategy::NetworkFirst);
        assert_eq!(
            strategy_for("/entries/direct?per_page=100"),
            CacheStrategy::NetworkFirst
        );
    }

    #[tokio::test]
    async fn cache_first_hit_makes_no_network_call() {
        let db = get_test_db();
        let hits = Arc::new(AtomicU32::new(0));
        let address = spawn_backend(counting_router(hits.clone())).await;
        let client = fast_client(address);
        let snapshot = RawResponse {
            body: br#"{"ok":true,"steps":["cached"]}"#.to_vec(),
            content_type: "application/json".to_owned(),
        };
        store("/prep/template", &snapshot, &db.lock().unwrap()).unwrap();

        let fetched = fetch_through_cache(&client, &db, "/prep/template")
            .await
            .unwrap();

        assert_eq!(fetched.served_from, Freshness::Cache);
        assert_eq!(fetched.body, snapshot.body, "cached bytes must be returned unchanged");
        assert_eq!(hits.load(Ordering::SeqCst), 0, "cache hit must not touch the network");
    }

    #[tokio::test]
    async fn cache_first_miss_fetches_and_populates() {
        let db = get_test_db();
        let hits = Arc::new(AtomicU32::new(0));
        let address = spawn_backend(counting_router(hits.clone())).await;
        let client = fast_client(address);

        let fetched = fetch_through_cache(&client, &db, "/prep/template")
            .await
            .unwrap();

        assert_eq!(fetched.served_from, Freshness::Network);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // A second fetch is served from the now-populated cache.
        let fetched_again = fetch_through_cache(&client, &db, "/prep/template")
            .await
            .unwrap();

        assert_eq!(fetched_again.served_from, Freshness::Cache);
        assert_eq!(fetched_again.body, fetched.body);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn network_first_falls_back_to_cache_when_unreachable() {
        let db = get_test_db();
        let client = unreachable_client();
        let snapshot = RawResponse {
            body: br#"{"ok":true,"count":0,"items":[]}"#.to_vec(),
            content_type: "application/json".to_owned(),
        };
        store("/entries/direct", &snapshot, &db.lock().unwrap()).unwrap();

        let fetched = fetch_through_cache(&client, &db, "/entries/direct")
            .await
            .unwrap();

        assert_eq!(fetched.served_from, Freshness::Cache);
        assert_eq!(fetched.body, snapshot.body);
    }

    #[tokio::test]
    async fn network_first_surfaces_error_without_cache() {
        let db = get_test_db();
        let client = unreachable_client();

        let result = fetch_through_cache(&client, &db, "/entries/direct").await;

        match result {
            Err(error) => assert!(error.is_transient()),
            Ok(_) => panic!("expected the fetch to fail without a cached copy"),
        }
    }

    #[tokio::test]
    async fn stale_while_revalidate_serves_cache_immediately() {
        let db = get_test_db();
        let hits = Arc::new(AtomicU32::new(0));
        let address = spawn_backend(counting_router(hits.clone())).await;
        let client = fast_client(address);
        let stale = RawResponse {
            body: br#"{"ok":true,"estimated_due_vat":999.0}"#.to_vec(),
            content_type: "application/json".to_owned(),
        };
        store("/tax/estimate", &stale, &db.lock().unwrap()).unwrap();

        let fetched = fetch_through_cache(&client, &db, "/tax/estimate")
            .await
            .unwrap();

        assert_eq!(fetched.served_from, Freshness::Cache);
        assert_eq!(fetched.body, stale.body);

        // The background refresh eventually replaces the snapshot.
        for _ in 0..50 {
            if hits.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(hits.load(Ordering::SeqCst) > 0, "expected a background refresh");
    }

    #[tokio::test]
    async fn stale_while_revalidate_with_empty_cache_fetches() {
        let db = get_test_db();
        let hits = Arc::new(AtomicU32::new(0));
        let address = spawn_backend(counting_router(hits.clone())).await;
        let client = fast_client(address);

        let fetched = fetch_through_cache(&client, &db, "/tax/estimate")
            .await
            .unwrap();

        assert_eq!(fetched.served_from, Freshness::Network);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_while_revalidate_serves_cache_when_unreachable() {
        let db = get_test_db();
        let client = unreachable_client();
        let stale = RawResponse {
            body: br#"{"ok":true,"estimated_due_vat":999.0}"#.to_vec(),
            content_type: "application/json".to_owned(),
        };
        store("/tax/estimate", &stale, &db.lock().unwrap()).unwrap();

        let fetched = fetch_through_cache(&client, &db, "/tax/estimate")
            .await
            .unwrap();

        assert_eq!(fetched.served_from, Freshness::Cache);
        assert_eq!(fetched.body, stale.body);
    }
}
