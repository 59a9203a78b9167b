//! Defines the page with the form for editing an existing ledger entry.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, Path, State},
    response::{IntoResponse, Response},
};
use maud::html;
use rusqlite::Connection;

use crate::{
    AppState, Error, endpoints,
    endpoints::format_endpoint,
    entry::{
        core::get_entry,
        form::{EntryFormDefaults, entry_form_fields},
    },
    html::{BUTTON_PRIMARY_STYLE, FORM_CONTAINER_STYLE, PENDING_BADGE_STYLE, base},
    navigation::NavBar,
    timezone::local_today,
};

/// The state needed to render the edit entry page.
#[derive(Debug, Clone)]
pub struct EditEntryPageState {
    /// The database connection holding the ledger.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The local timezone as a canonical timezone name, e.g. "Asia/Seoul".
    pub local_timezone: String,
}

impl FromRef<AppState> for EditEntryPageState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            local_timezone: state.local_timezone.clone(),
        }
    }
}

/// A route handler for the page with the edit entry form.
pub async fn get_edit_entry_page(
    State(state): State<EditEntryPageState>,
    Path(entry_id): Path<i64>,
) -> Response {
    let Some(today) = local_today(&state.local_timezone) else {
        return Error::InvalidTimezoneError(state.local_timezone).into_response();
    };

    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    let entry = match get_entry(entry_id, &connection) {
        Ok(entry) => entry,
        Err(error) => return error.into_response(),
    };

    let nav_bar = NavBar::new(endpoints::ENTRIES_VIEW).into_html();
    let form_fields = entry_form_fields(&EntryFormDefaults {
        entry_type: entry.entry_type,
        date: entry.date,
        max_date: today,
        vendor: Some(&entry.vendor),
        amount: Some(entry.amount),
        vat_amount: Some(entry.vat_amount),
        memo: Some(&entry.memo),
    });
    let update_endpoint = format_endpoint(endpoints::ENTRY_API, entry.id);

    let content = html! {
        (nav_bar)

        div class=(FORM_CONTAINER_STYLE)
        {
            h1 class="text-xl font-bold my-4" { "Edit entry" }

            @if entry.pending_sync {
                p class=(PENDING_BADGE_STYLE)
                {
                    "Awaiting sync, changes apply locally until the tax engine is reachable"
                }
            }

            form
                hx-put=(update_endpoint)
                hx-target-error="#alert-container"
                class="w-full space-y-4 md:space-y-6"
            {
                (form_fields)

                button type="submit" class=(BUTTON_PRIMARY_STYLE) { "Update entry" }
            }
        }
    };

    base("Edit Entry", &content).into_response()
}
