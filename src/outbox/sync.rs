//! Replaying the outbox against the tax engine.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, State},
    response::{IntoResponse, Response},
};
use rusqlite::Connection;

use crate::{
    AppState, Error,
    alert::Alert,
    backend::BackendClient,
    entry::{RemoteEntry, reconcile_entry},
    outbox::{self, OutboxItem},
};

/// What a sync run achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Items acknowledged by the engine and reconciled locally.
    pub delivered: u32,
    /// Items that stay pending because their delivery failed.
    pub failed: u32,
}

/// Replay every pending outbox item in queue order.
///
/// Each delivered item is marked exactly once and its ledger entry gets
/// the engine-assigned id. A failed item stays pending and does not stop
/// later items from being attempted.
///
/// # Errors
/// Returns an [Error::DatabaseLockError] or [Error::SqlError] if the
/// queue itself cannot be read. Per-item delivery failures are reported
/// through the [SyncReport], not as errors.
pub async fn sync_pending_entries(
    client: &BackendClient,
    db_connection: &Arc<Mutex<Connection>>,
) -> Result<SyncReport, Error> {
    let items = {
        let connection = db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;
        outbox::pending_items(&connection)?
    };

    let mut report = SyncReport::default();

    for item in items {
        match deliver_item(client, &item).await {
            Ok(remote) => {
                let connection = db_connection
                    .lock()
                    .map_err(|_| Error::DatabaseLockError)?;

                if outbox::mark_delivered(item.id, &connection)? {
                    if let Err(error) = reconcile_entry(item.id, remote.id, &connection) {
                        // The entry may have been deleted locally while the
                        // item was in flight; the delivery itself stands.
                        tracing::warn!(
                            "delivered outbox item {} but could not reconcile its entry: {error}",
                            item.id
                        );
                    }
                    report.delivered += 1;
                } else {
                    tracing::debug!("outbox item {} was already delivered", item.id);
                }
            }
            Err(error) => {
                tracing::warn!("could not deliver outbox item {}: {error}", item.id);

                let connection = db_connection
                    .lock()
                    .map_err(|_| Error::DatabaseLockError)?;
                outbox::record_attempt(item.id, &connection)?;
                report.failed += 1;
            }
        }
    }

    if report.delivered > 0 {
        tracing::info!("synced {} offline entries with the tax engine", report.delivered);
    }

    Ok(report)
}

async fn deliver_item(client: &BackendClient, item: &OutboxItem) -> Result<RemoteEntry, Error> {
    let envelope = client.post("/entries/direct", &item.payload).await?;

    envelope.decode_payload::<RemoteEntry>()
}

/// The state needed to replay the outbox.
#[derive(Debug, Clone)]
pub struct SyncState {
    /// The database connection holding the outbox and the ledger.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The tax engine client.
    pub backend: BackendClient,
}

impl FromRef<AppState> for SyncState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            backend: state.backend.clone(),
        }
    }
}

/// A route handler that replays the outbox and reports the result as an alert.
pub async fn sync_endpoint(State(state): State<SyncState>) -> Response {
    match sync_pending_entries(&state.backend, &state.db_connection).await {
        Ok(SyncReport {
            delivered: 0,
            failed: 0,
        }) => Alert::SuccessSimple {
            message: "Nothing to sync, the ledger is up to date.".to_owned(),
        }
        .into_response(),
        Ok(SyncReport {
            delivered,
            failed: 0,
        }) => Alert::Success {
            message: "Sync complete".to_owned(),
            details: format!("{delivered} offline entries were delivered to the tax engine."),
        }
        .into_response(),
        Ok(SyncReport { delivered, failed }) => Alert::Error {
            message: "Sync incomplete".to_owned(),
            details: format!(
                "{delivered} entries were delivered, {failed} could not be and will be retried later."
            ),
        }
        .into_response(),
        Err(error) => {
            tracing::error!("could not run sync: {error}");
            error.into_alert_response()
        }
    }
}
