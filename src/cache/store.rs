//! The database table holding cached tax engine responses.

use rusqlite::{Connection, Row, params};
use time::OffsetDateTime;

use crate::{Error, backend::RawResponse};

/// The current cache version.
///
/// There is no per-entry expiry; bumping this string is the only way to
/// invalidate previously cached responses. Rows with any other version
/// are deleted by [purge_stale_versions] at startup.
pub const CACHE_VERSION: &str = "easytax-cache-v2";

/// A previously cached tax engine response.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    /// The response body, exactly as the engine sent it.
    pub body: Vec<u8>,
    /// The value of the `Content-Type` header at cache time.
    pub content_type: String,
    /// When the snapshot was taken.
    pub cached_at: OffsetDateTime,
}

/// Create the response cache table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_response_cache_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS response_cache (
                url TEXT PRIMARY KEY,
                body BLOB NOT NULL,
                content_type TEXT NOT NULL,
                cache_version TEXT NOT NULL,
                cached_at TEXT NOT NULL
                )",
        (),
    )?;

    Ok(())
}

/// Delete every cached response whose version does not match [CACHE_VERSION].
///
/// Run once at startup, mirroring a service worker's activate step.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn purge_stale_versions(connection: &Connection) -> Result<usize, Error> {
    let deleted = connection.execute(
        "DELETE FROM response_cache WHERE cache_version <> ?1",
        params![CACHE_VERSION],
    )?;

    if deleted > 0 {
        tracing::info!("purged {deleted} cached responses from older cache versions");
    }

    Ok(deleted)
}

/// Store a response snapshot for `url`, replacing any previous snapshot.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn store(url: &str, response: &RawResponse, connection: &Connection) -> Result<(), Error> {
    connection.execute(
        "INSERT OR REPLACE INTO response_cache (url, body, content_type, cache_version, cached_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            url,
            response.body,
            response.content_type,
            CACHE_VERSION,
            OffsetDateTime::now_utc()
        ],
    )?;

    Ok(())
}

/// Look up the cached snapshot for `url`, if any.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn lookup(url: &str, connection: &Connection) -> Result<Option<CachedResponse>, Error> {
    let result = connection
        .prepare(
            "SELECT body, content_type, cached_at FROM response_cache
             WHERE url = :url AND cache_version = :version",
        )?
        .query_row(
            &[(":url", url), (":version", CACHE_VERSION)],
            map_cached_response_row,
        );

    match result {
        Ok(cached) => Ok(Some(cached)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn map_cached_response_row(row: &Row) -> Result<CachedResponse, rusqlite::Error> {
    Ok(CachedResponse {
        body: row.get(0)?,
        content_type: row.get(1)?,
        cached_at: row.get(2)?,
    })
}

#[cfg(test)]
mod store_tests {
    use rusqlite::{Connection, params};

    use crate::{backend::RawResponse, db::initialize};

    use super::{lookup, purge_stale_versions, store};

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    fn json_response(body: &str) -> RawResponse {
        RawResponse {
            body: body.as_bytes().to_vec(),
            content_type: "application/json".to_owned(),
        }
    }

    #[test]
    fn lookup_returns_stored_bytes_unchanged() {
        let conn = get_test_connection();
        let response = json_response(r#"{"ok":true,"estimated_due_vat":1234.5}"#);
        store("/tax/estimate?period=2025-09", &response, &conn).unwrap();

        let cached = lookup("/tax/estimate?period=2025-09", &conn)
            .unwrap()
            .expect("Expected a cached response");

        assert_eq!(cached.body, response.body);
        assert_eq!(cached.content_type, response.content_type);
    }

    #[test]
    fn lookup_misses_for_unknown_url() {
        let conn = get_test_connection();

        let cached = lookup("/tax/estimate?period=2000-01", &conn).unwrap();

        assert_eq!(cached, None);
    }

    #[test]
    fn store_replaces_previous_snapshot() {
        let conn = get_test_connection();
        store("/prep/template", &json_response("old"), &conn).unwrap();

        store("/prep/template", &json_response("new"), &conn).unwrap();

        let cached = lookup("/prep/template", &conn).unwrap().unwrap();
        assert_eq!(cached.body, b"new");
    }

    #[test]
    fn purge_deletes_only_other_versions() {
        let conn = get_test_connection();
        store("/prep/template", &json_response("current"), &conn).unwrap();
        conn.execute(
            "INSERT INTO response_cache (url, body, content_type, cache_version, cached_at)
             VALUES (?1, ?2, 'application/json', 'easytax-cache-v1', '2025-01-01T00:00:00Z')",
            params!["/tax/estimate?period=2025-01", b"stale".to_vec()],
        )
        .unwrap();

        let deleted = purge_stale_versions(&conn).unwrap();

        assert_eq!(deleted, 1);
        assert!(lookup("/prep/template", &conn).unwrap().is_some());
        assert!(
            lookup("/tax/estimate?period=2025-01", &conn)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn current_version_is_the_only_one_served() {
        // lookup filters on the version column as well as the URL, so a
        // stale row that somehow survived a purge is never served.
        let conn = get_test_connection();
        conn.execute(
            "INSERT INTO response_cache (url, body, content_type, cache_version, cached_at)
             VALUES ('/prep/template', ?1, 'application/json', 'easytax-cache-v0', '2024-01-01T00:00:00Z')",
            params![b"ancient".to_vec()],
        )
        .unwrap();

        assert_eq!(lookup("/prep/template", &conn).unwrap(), None);
    }
}
