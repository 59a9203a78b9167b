//! Defines the endpoint for importing ledger entries from CSV files.
//!
//! Each parsed row is posted to the tax engine. The first transient
//! failure flips the whole batch into offline mode: the remaining rows go
//! straight to the outbox instead of timing out one by one.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::{
    extract::{FromRef, Multipart, State, multipart::Field},
    response::{IntoResponse, Response},
};
use rusqlite::Connection;

use crate::{
    AppState, Error,
    alert::Alert,
    backend::BackendClient,
    csv_import::csv::{ImportRow, parse_ledger_csv},
    entry::{
        EntrySource, RemoteEntry, import_id_exists, insert_pending_entry, insert_synced_entry,
    },
    outbox,
    timezone::local_today,
};

/// The state needed for importing entries.
#[derive(Debug, Clone)]
pub struct ImportState {
    /// The database connection holding the ledger and the outbox.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The tax engine client.
    pub backend: BackendClient,
    /// The local timezone as a canonical timezone name, e.g. "Asia/Seoul".
    pub local_timezone: String,
}

impl FromRef<AppState> for ImportState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            backend: state.backend.clone(),
            local_timezone: state.local_timezone.clone(),
        }
    }
}

/// What happened to the rows of an import batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ImportReport {
    /// Rows the engine acknowledged.
    delivered: u32,
    /// Rows queued in the outbox because the engine was unreachable.
    queued: u32,
    /// Rows already in the ledger from an earlier import.
    duplicates: u32,
    /// Rows that could not be parsed, plus rows the engine rejected.
    skipped: u32,
}

/// Route handler for importing entries from uploaded CSV files.
pub async fn import_entries_endpoint(
    State(state): State<ImportState>,
    mut multipart: Multipart,
) -> Result<Response, Response> {
    let start_time = Instant::now();

    let Some(today) = local_today(&state.local_timezone) else {
        tracing::error!("Invalid timezone {}", state.local_timezone);
        return Err(Error::InvalidTimezoneError(state.local_timezone).into_alert_response());
    };

    let mut rows = Vec::new();
    let mut report = ImportReport::default();

    loop {
        let field = multipart.next_field().await.map_err(|error| {
            Error::MultipartError(error.to_string()).into_alert_response()
        })?;

        let Some(field) = field else {
            break;
        };

        let csv_text = parse_multipart_field(field)
            .await
            .map_err(|error| error.into_alert_response())?;

        let parsed = parse_ledger_csv(&csv_text, today)
            .map_err(|error| error.into_alert_response())?;

        report.skipped += parsed.skipped;
        rows.extend(parsed.rows);
    }

    if rows.is_empty() && report.skipped == 0 {
        return Err(Error::InvalidCsv("the uploaded files contain no rows".to_owned())
            .into_alert_response());
    }

    deliver_rows(&state, rows, &mut report).await.map_err(|error| {
        tracing::error!("could not import entries: {error}");
        error.into_alert_response()
    })?;

    tracing::info!(
        "import finished in {}ms: {} delivered, {} queued, {} duplicates, {} skipped",
        start_time.elapsed().as_millis(),
        report.delivered,
        report.queued,
        report.duplicates,
        report.skipped
    );

    Ok(import_alert(&report).into_response())
}

/// Extract the text of one uploaded CSV file.
async fn parse_multipart_field(field: Field<'_>) -> Result<String, Error> {
    let is_csv_content_type = field
        .content_type()
        .map(|content_type| content_type.contains("csv"))
        .unwrap_or(false);
    let has_csv_extension = field
        .file_name()
        .map(|file_name| file_name.to_lowercase().ends_with(".csv"))
        .unwrap_or(false);

    if !is_csv_content_type && !has_csv_extension {
        return Err(Error::NotCsv);
    }

    let bytes = field
        .bytes()
        .await
        .map_err(|error| Error::MultipartError(error.to_string()))?;

    String::from_utf8(bytes.to_vec())
        .map_err(|error| Error::InvalidCsv(format!("file is not valid UTF-8: {error}")))
}

async fn deliver_rows(
    state: &ImportState,
    rows: Vec<ImportRow>,
    report: &mut ImportReport,
) -> Result<(), Error> {
    let mut engine_unreachable = false;

    for row in rows {
        {
            let connection = state
                .db_connection
                .lock()
                .map_err(|_| Error::DatabaseLockError)?;

            if import_id_exists(row.import_id, &connection)? {
                report.duplicates += 1;
                continue;
            }
        }

        if engine_unreachable {
            queue_row(state, &row)?;
            report.queued += 1;
            continue;
        }

        match state.backend.post("/entries/direct", &row.payload).await {
            Ok(envelope) => {
                let remote: RemoteEntry = envelope.decode_payload()?;
                let connection = state
                    .db_connection
                    .lock()
                    .map_err(|_| Error::DatabaseLockError)?;
                insert_synced_entry(
                    &remote,
                    EntrySource::Upload,
                    Some(row.import_id),
                    &connection,
                )?;
                report.delivered += 1;
            }
            Err(error) if error.is_transient() => {
                tracing::warn!(
                    "tax engine became unreachable mid-import, queueing the rest: {error}"
                );
                engine_unreachable = true;
                queue_row(state, &row)?;
                report.queued += 1;
            }
            Err(error) => {
                tracing::warn!(
                    "the tax engine rejected an imported row for {}: {error}",
                    row.payload.vendor
                );
                report.skipped += 1;
            }
        }
    }

    Ok(())
}

fn queue_row(state: &ImportState, row: &ImportRow) -> Result<(), Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    let outbox_id = outbox::enqueue(&row.payload, &connection)?;
    insert_pending_entry(&row.payload, outbox_id, Some(row.import_id), &connection)?;

    Ok(())
}

fn import_alert(report: &ImportReport) -> Alert {
    let mut parts = vec![format!("{} entries imported", report.delivered)];

    if report.queued > 0 {
        parts.push(format!("{} queued for sync", report.queued));
    }
    if report.duplicates > 0 {
        parts.push(format!("{} duplicates skipped", report.duplicates));
    }
    if report.skipped > 0 {
        parts.push(format!("{} rows could not be imported", report.skipped));
    }

    let details = format!("{}.", parts.join(", "));

    if report.queued > 0 {
        Alert::Warning {
            message: "Import saved locally".to_owned(),
            details: format!(
                "{details} Queued entries sync automatically once the tax engine is reachable."
            ),
        }
    } else if report.delivered == 0 && report.skipped > 0 {
        Alert::Error {
            message: "Import failed".to_owned(),
            details,
        }
    } else {
        Alert::Success {
            message: "Import complete".to_owned(),
            details,
        }
    }
}


#[cfg(test)]
mod delivery_tests {
    use std::{
        net::SocketAddr,
        sync::{
            Arc,
            atomic::{AtomicI64, Ordering},
        },
    };

    use axum::{Json, Router, extract::State, routing::post};
    use serde_json::{Value, json};
    use time::macros::date;

    use crate::{
        app_state::test_utils::{offline_state, state_with_backend},
        csv_import::csv::parse_ledger_csv,
        entry::list_entries,
        outbox,
    };

    use super::{ImportReport, ImportState, deliver_rows};

    const CSV_TEXT: &str = "\
date,vendor,type,amount,vat,memo
2025-09-01,Fresh Foods,expense,42000,4200,
2025-09-02,Acme,income,100000,10000,invoice 12
";

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

    fn accepting_router() -> Router {
        Router::new()
            .route(
                "/entries/direct",
                post(
                    |State(next_id): State<Arc<AtomicI64>>, Json(body): Json<Value>| async move {
                        let id = next_id.fetch_add(1, Ordering::SeqCst);
                        let mut data = body;
                        data["id"] = json!(id);
                        Json(json!({"success": true, "data": data}))
                    },
                ),
            )
            .with_state(Arc::new(AtomicI64::new(1)))
    }

    fn import_state(app_state: &crate::AppState) -> ImportState {
        ImportState {
            db_connection: app_state.db_connection.clone(),
            backend: app_state.backend.clone(),
            local_timezone: app_state.local_timezone.clone(),
        }
    }

    #[tokio::test]
    async fn delivers_rows_when_the_engine_answers() {
        let address = spawn_backend(accepting_router()).await;
        let app_state = state_with_backend(&format!("http://{address}"));
        let state = import_state(&app_state);
        let rows = parse_ledger_csv(CSV_TEXT, date!(2025 - 09 - 30)).unwrap().rows;
        let mut report = ImportReport::default();

        deliver_rows(&state, rows, &mut report).await.unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.queued, 0);

        let connection = app_state.db_connection.lock().unwrap();
        assert_eq!(list_entries(10, 0, &connection).unwrap().len(), 2);
        assert_eq!(outbox::pending_count(&connection).unwrap(), 0);
    }

    #[tokio::test]
    async fn queues_the_batch_when_the_engine_is_unreachable() {
        let app_state = offline_state();
        let state = import_state(&app_state);
        let rows = parse_ledger_csv(CSV_TEXT, date!(2025 - 09 - 30)).unwrap().rows;
        let mut report = ImportReport::default();

        deliver_rows(&state, rows, &mut report).await.unwrap();

        assert_eq!(report.delivered, 0);
        assert_eq!(report.queued, 2);

        let connection = app_state.db_connection.lock().unwrap();
        let entries = list_entries(10, 0, &connection).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|entry| entry.pending_sync));
        assert_eq!(outbox::pending_count(&connection).unwrap(), 2);
    }

    #[tokio::test]
    async fn reimporting_the_same_file_skips_every_row() {
        let address = spawn_backend(accepting_router()).await;
        let app_state = state_with_backend(&format!("http://{address}"));
        let state = import_state(&app_state);
        let today = date!(2025 - 09 - 30);

        let rows = parse_ledger_csv(CSV_TEXT, today).unwrap().rows;
        let mut report = ImportReport::default();
        deliver_rows(&state, rows, &mut report).await.unwrap();
        assert_eq!(report.delivered, 2);

        let rows = parse_ledger_csv(CSV_TEXT, today).unwrap().rows;
        let mut second_report = ImportReport::default();
        deliver_rows(&state, rows, &mut second_report).await.unwrap();

        assert_eq!(second_report.delivered, 0);
        assert_eq!(second_report.duplicates, 2);

        let connection = app_state.db_connection.lock().unwrap();
        assert_eq!(list_entries(10, 0, &connection).unwrap().len(), 2);
    }
}
