//! Defines the endpoint for deleting a ledger entry.
//!
//! Synced entries are deleted on the tax engine first and then locally.
//! Entries that are still pending never reached the engine, so their
//! outbox item is cancelled and the local row removed, nothing else.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, Path, State},
    response::{IntoResponse, Response},
};
use rusqlite::Connection;

use crate::{
    AppState, Error,
    alert::Alert,
    backend::BackendClient,
    endpoints::format_endpoint,
    entry::core::{LedgerEntry, delete_entry, get_entry},
    outbox,
};

/// The state needed to delete an entry.
#[derive(Debug, Clone)]
pub struct DeleteEntryState {
    /// The database connection holding the ledger and the outbox.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The tax engine client.
    pub backend: BackendClient,
}

impl FromRef<AppState> for DeleteEntryState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            backend: state.backend.clone(),
        }
    }
}

/// A route handler for deleting an entry, responds with an alert.
pub async fn delete_entry_endpoint(
    State(state): State<DeleteEntryState>,
    Path(entry_id): Path<i64>,
) -> Response {
    let entry = {
        let connection = match state.db_connection.lock() {
            Ok(connection) => connection,
            Err(error) => {
                tracing::error!("could not acquire database lock: {error}");
                return Error::DatabaseLockError.into_alert_response();
            }
        };

        match get_entry(entry_id, &connection) {
            Ok(entry) => entry,
            Err(Error::NotFound) => return Error::DeleteMissingEntry.into_alert_response(),
            Err(error) => {
                tracing::error!("could not load entry {entry_id}: {error}");
                return error.into_alert_response();
            }
        }
    };

    // Entries the engine knows about must be removed there too; the
    // local row only goes once the engine has agreed.
    if let Some(remote_id) = entry.remote_id {
        let path = format_endpoint("/entries/direct/{id}", remote_id);

        if let Err(error) = state.backend.delete(&path).await {
            tracing::error!("could not delete entry {remote_id} on the tax engine: {error}");
            return error.into_alert_response();
        }
    }

    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_alert_response();
        }
    };

    if let Err(error) = cancel_pending_delivery(&entry, &connection) {
        tracing::error!("could not cancel outbox item for entry {entry_id}: {error}");
        return error.into_alert_response();
    }

    match delete_entry(entry_id, &connection) {
        // The status code has to be 200 OK or HTMX will not delete the table row.
        Ok(rows_affected) if rows_affected != 0 => Alert::SuccessSimple {
            message: "Entry deleted successfully".to_owned(),
        }
        .into_response(),
        Ok(_) => Error::DeleteMissingEntry.into_alert_response(),
        Err(error) => {
            tracing::error!("could not delete entry {entry_id}: {error}");
            error.into_alert_response()
        }
    }
}

fn cancel_pending_delivery(entry: &LedgerEntry, connection: &Connection) -> Result<(), Error> {
    if let Some(outbox_id) = entry.outbox_id {
        if outbox::cancel(outbox_id, connection)? {
            tracing::debug!("cancelled outbox item {outbox_id} for deleted entry {}", entry.id);
        }
    }

    Ok(())
}
