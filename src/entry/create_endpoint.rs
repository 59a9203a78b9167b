//! Defines the endpoint for creating a new ledger entry.
//!
//! The entry is posted to the tax engine first. When the engine is
//! unreachable the entry falls back to the offline path: it is queued in
//! the outbox and stored locally with the pending-sync flag until a later
//! sync delivers it.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
// Must use axum_extra's Form since that parses an empty string as None instead
// of crashing like axum::Form.
use axum_extra::extract::Form;
use axum_htmx::HxRedirect;
use rusqlite::Connection;
use serde::Deserialize;
use time::Date;

use crate::{
    AppState, Error, endpoints,
    backend::BackendClient,
    entry::core::{
        EntryPayload, EntrySource, EntryType, RemoteEntry, insert_pending_entry,
        insert_synced_entry,
    },
    outbox,
    timezone::local_today,
};

/// The state needed to create an entry.
#[derive(Debug, Clone)]
pub struct CreateEntryState {
    /// The database connection holding the ledger and the outbox.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The tax engine client.
    pub backend: BackendClient,
    /// The local timezone as a canonical timezone name, e.g. "Asia/Seoul".
    pub local_timezone: String,
}

impl FromRef<AppState> for CreateEntryState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            backend: state.backend.clone(),
            local_timezone: state.local_timezone.clone(),
        }
    }
}

/// The form data for creating or editing an entry.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryForm {
    /// When the transaction happened.
    pub date: Date,
    /// The business the money came from or went to.
    pub vendor: String,
    /// Income or expense.
    pub entry_type: EntryType,
    /// The transaction amount in won.
    pub amount: f64,
    /// The VAT portion of the amount in won.
    #[serde(default)]
    pub vat_amount: Option<f64>,
    /// A free-text note.
    #[serde(default)]
    pub memo: Option<String>,
}

impl EntryForm {
    /// Validate the form into an engine payload.
    pub fn into_payload(self, source: EntrySource, today: Date) -> Result<EntryPayload, Error> {
        EntryPayload::new(
            self.date,
            &self.vendor,
            self.entry_type,
            self.amount,
            self.vat_amount.unwrap_or(0.0),
            self.memo.as_deref().unwrap_or(""),
            source,
            today,
        )
    }
}

/// A route handler for creating a new entry, redirects to the entries
/// view on success.
///
/// Validation failures are rejected before any network call. When the
/// engine cannot be reached the entry is saved locally and queued for
/// sync instead of being lost.
pub async fn create_entry_endpoint(
    State(state): State<CreateEntryState>,
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

    match state.backend.post("/entries/direct", &payload).await {
        Ok(envelope) => {
            let remote: RemoteEntry = match envelope.decode_payload() {
                Ok(remote) => remote,
                Err(error) => {
                    tracing::error!("could not decode created entry: {error}");
                    return error.into_alert_response();
                }
            };

            let connection = match state.db_connection.lock() {
                Ok(connection) => connection,
                Err(error) => {
                    tracing::error!("could not acquire database lock: {error}");
                    return Error::DatabaseLockError.into_alert_response();
                }
            };

            if let Err(error) = insert_synced_entry(&remote, EntrySource::Direct, None, &connection)
            {
                tracing::error!("could not cache created entry: {error}");
                return error.into_alert_response();
            }

            redirect_to_entries()
        }
        Err(error) if error.is_transient() => {
            tracing::warn!("saving entry offline, the tax engine is unreachable: {error}");

            let connection = match state.db_connection.lock() {
                Ok(connection) => connection,
                Err(error) => {
                    tracing::error!("could not acquire database lock: {error}");
                    return Error::DatabaseLockError.into_alert_response();
                }
            };

            if let Err(error) = save_offline(&payload, &connection) {
                tracing::error!("could not save entry offline: {error}");
                return error.into_alert_response();
            }

            redirect_to_entries()
        }
        Err(error) => {
            tracing::error!("could not create entry: {error}");
            error.into_alert_response()
        }
    }
}

/// Queue the create request and store the pending ledger row.
pub(crate) fn save_offline(
    payload: &EntryPayload,
    connection: &Connection,
) -> Result<(), Error> {
    let outbox_id = outbox::enqueue(payload, connection)?;
    insert_pending_entry(payload, outbox_id, None, connection)?;

    Ok(())
}

fn redirect_to_entries() -> Response {
    (
        HxRedirect(endpoints::ENTRIES_VIEW.to_owned()),
        StatusCode::SEE_OTHER,
    )
        .into_response()
}
