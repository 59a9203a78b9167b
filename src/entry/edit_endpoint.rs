//! Defines the endpoint for updating a ledger entry.
//!
//! Synced entries round-trip through the tax engine. Entries that are
//! still pending only exist locally, so the edit rewrites the local row
//! and the queued outbox payload instead.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::Form;
use axum_htmx::HxRedirect;
use rusqlite::Connection;

use crate::{
    AppState, Error, endpoints,
    backend::BackendClient,
    endpoints::format_endpoint,
    entry::{
        core::{EntryPayload, EntrySource, get_entry, update_local_entry},
        create_endpoint::EntryForm,
    },
    outbox,
    timezone::local_today,
};

/// The state needed to update an entry.
#[derive(Debug, Clone)]
pub struct EditEntryState {
    /// The database connection holding the ledger and the outbox.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The tax engine client.
    pub backend: BackendClient,
    /// The local timezone as a canonical timezone name, e.g. "Asia/Seoul".
    pub local_timezone: String,
}

impl FromRef<AppState> for EditEntryState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            backend: state.backend.clone(),
            local_timezone: state.local_timezone.clone(),
        }
    }
}

/// A route handler for updating an entry, redirects to the entries view
/// on success.
pub async fn edit_entry_endpoint(
    State(state): State<EditEntryState>,
    Path(entry_id): Path<i64>,
    Form(form): Form<EntryForm>,
) -> Response {
    let Some(today) = local_today(&state.local_timezone) else {
        tracing::error!("Invalid timezone {}", state.local_timezone);
        return Error::InvalidTimezoneError(state.local_timezone).into_alert_response();
    };

    let payload = match form.into_payload(EntrySource::Direct, today) {
        Ok(payload) => payload,
        Err(error) => return error.into_alert_response(),
    };

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
            Err(Error::NotFound) => return Error::UpdateMissingEntry.into_alert_response(),
            Err(error) => {
                tracing::error!("could not load entry {entry_id}: {error}");
                return error.into_alert_response();
            }
        }
    };

    if let Some(remote_id) = entry.remote_id {
        let path = format_endpoint("/entries/direct/{id}", remote_id);

        if let Err(error) = state.backend.put(&path, &payload).await {
            tracing::error!("could not update entry {remote_id} on the tax engine: {error}");
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

    if let Err(error) = apply_local_edit(&entry.outbox_id, entry_id, &payload, &connection) {
        tracing::error!("could not update entry {entry_id}: {error}");
        return error.into_alert_response();
    }

    (
        HxRedirect(endpoints::ENTRIES_VIEW.to_owned()),
        StatusCode::SEE_OTHER,
    )
        .into_response()
}

/// Rewrite the local row, and the queued request when the entry has not
/// been delivered yet.
fn apply_local_edit(
    outbox_id: &Option<i64>,
    entry_id: i64,
    payload: &EntryPayload,
    connection: &Connection,
) -> Result<(), Error> {
    update_local_entry(entry_id, payload, connection)?;

    if let Some(outbox_id) = outbox_id {
        outbox::update_payload(*outbox_id, payload, connection)?;
    }

    Ok(())
}
