//! Implements a struct that holds the state of the web server.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::{
    Error, backend::BackendClient, cache::purge_stale_versions, db::initialize,
    pagination::PaginationConfig,
};

/// The state of the web server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The local database holding the ledger cache, the outbox and the
    /// response cache.
    pub db_connection: Arc<Mutex<Connection>>,

    /// The resilient client for the tax engine.
    pub backend: BackendClient,

    /// The local timezone as a canonical timezone name, e.g. "Asia/Seoul".
    pub local_timezone: String,

    /// The config that controls how to display pages of entries.
    pub pagination_config: PaginationConfig,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database schema and purge cached
    /// responses left behind by older cache versions.
    /// `local_timezone` should be a valid, canonical timezone name, e.g. "Asia/Seoul".
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn new(
        db_connection: Connection,
        backend: BackendClient,
        local_timezone: &str,
        pagination_config: PaginationConfig,
    ) -> Result<Self, Error> {
        initialize(&db_connection)?;
        purge_stale_versions(&db_connection)?;

        Ok(Self {
            db_connection: Arc::new(Mutex::new(db_connection)),
            backend,
            local_timezone: local_timezone.to_owned(),
            pagination_config,
        })
    }
}
