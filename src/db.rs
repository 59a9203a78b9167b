//! Creates the schema for the application's local database: the ledger
//! cache, the offline outbox and the response cache.

use rusqlite::{Connection, Transaction as SqlTransaction};

use crate::{
    Error, cache::create_response_cache_table, entry::create_entry_table,
    outbox::create_outbox_table,
};

/// Create the application's tables if they do not exist.
///
/// All tables are created within a single transaction so the schema is
/// never left half-built.
///
/// # Errors
/// Returns an error if a table cannot be created.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    let transaction =
        SqlTransaction::new_unchecked(connection, rusqlite::TransactionBehavior::Exclusive)?;

    create_entry_table(&transaction)?;
    create_outbox_table(&transaction)?;
    create_response_cache_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}
