//! Defines the page listing the ledger, the app's view of
//! `GET /entries/direct` on the tax engine.
//!
//! The handler applies the network-first policy at the domain level: it
//! refreshes the local ledger cache from the engine when reachable and
//! serves the cache alone when not, with pending rows badged either way.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, Query, State},
    response::{IntoResponse, Response},
};
use maud::{Markup, html};
use rusqlite::Connection;
use serde::Deserialize;

use crate::{
    AppState, Error, endpoints,
    backend::BackendClient,
    endpoints::format_endpoint,
    entry::core::{
        EntryType, LedgerEntry, RemoteEntry, count_entries, list_entries, replace_synced_entries,
    },
    html::{
        BUTTON_DELETE_STYLE, LINK_STYLE, PAGE_CONTAINER_STYLE, PENDING_BADGE_STYLE,
        TABLE_CELL_STYLE, TABLE_HEADER_STYLE, TABLE_ROW_STYLE, base, format_won,
    },
    navigation::NavBar,
    pagination::{PageMarker, PaginationConfig, page_count, page_markers},
};

/// The state needed to render the entries page.
#[derive(Debug, Clone)]
pub struct EntriesPageState {
    /// The database connection holding the ledger cache.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The tax engine client.
    pub backend: BackendClient,
    /// The config that controls how entries are paged.
    pub pagination_config: PaginationConfig,
}

impl FromRef<AppState> for EntriesPageState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            backend: state.backend.clone(),
            pagination_config: state.pagination_config.clone(),
        }
    }
}

/// The query parameters for the entries page.
#[derive(Debug, Deserialize)]
pub struct EntriesQuery {
    /// The page to display, defaulting to the first.
    pub page: Option<u32>,
}

/// The shape of the `data` payload of `GET /entries/direct`.
#[derive(Debug, Deserialize)]
struct DirectEntriesPayload {
    entries: Vec<RemoteEntry>,
}

/// A route handler for the page listing the ledger.
pub async fn get_entries_page(
    State(state): State<EntriesPageState>,
    Query(query): Query<EntriesQuery>,
) -> Response {
    // Network first: refresh the cache from the engine when it answers,
    // and fall back to the cached ledger when it does not.
    let serving_cached = match refresh_from_engine(&state).await {
        Ok(()) => false,
        Err(error) if error.is_transient() => {
            tracing::warn!("serving the cached ledger, the tax engine is unreachable: {error}");
            true
        }
        Err(error) => {
            tracing::error!("could not refresh the ledger from the tax engine: {error}");
            true
        }
    };

    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    let page_size = state.pagination_config.default_page_size;
    let total = match count_entries(&connection) {
        Ok(total) => total,
        Err(error) => return error.into_response(),
    };
    let pages = page_count(total, page_size);
    let current_page = query.page.unwrap_or(1).clamp(1, pages);

    let entries = match list_entries(page_size, (current_page - 1) * page_size, &connection) {
        Ok(entries) => entries,
        Err(error) => return error.into_response(),
    };

    entries_view(
        &entries,
        serving_cached,
        current_page,
        pages,
        state.pagination_config.surrounding_pages,
    )
    .into_response()
}

async fn refresh_from_engine(state: &EntriesPageState) -> Result<(), Error> {
    let envelope = state.backend.get("/entries/direct?per_page=100").await?;
    let payload: DirectEntriesPayload = envelope.decode_payload()?;

    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    replace_synced_entries(&payload.entries, &connection)
}

fn entries_view(
    entries: &[LedgerEntry],
    serving_cached: bool,
    current_page: u32,
    pages: u32,
    surrounding_pages: u32,
) -> Markup {
    let nav_bar = NavBar::new(endpoints::ENTRIES_VIEW).into_html();

    let content = html! {
        (nav_bar)

        div class=(PAGE_CONTAINER_STYLE)
        {
            div class="flex w-full max-w-3xl items-center justify-between my-4"
            {
                h1 class="text-xl font-bold" { "Entries" }

                a href=(endpoints::NEW_ENTRY_VIEW) class=(LINK_STYLE) { "Record an entry" }
            }

            @if serving_cached {
                p class="w-full max-w-3xl mb-4 text-sm text-amber-700 dark:text-amber-300"
                {
                    "The tax engine is unreachable, showing the locally cached ledger."
                }
            }

            @if entries.is_empty() {
                p { "No entries yet. Record one or import a CSV file." }
            } @else {
                div class="w-full max-w-3xl overflow-x-auto shadow-md rounded-lg"
                {
                    table class="w-full text-sm text-left text-gray-500 dark:text-gray-400"
                    {
                        thead class=(TABLE_HEADER_STYLE)
                        {
                            tr
                            {
                                th class=(TABLE_CELL_STYLE) { "Date" }
                                th class=(TABLE_CELL_STYLE) { "Vendor" }
                                th class=(TABLE_CELL_STYLE) { "Amount" }
                                th class=(TABLE_CELL_STYLE) { "VAT" }
                                th class=(TABLE_CELL_STYLE) { "Memo" }
                                th class=(TABLE_CELL_STYLE) { "" }
                            }
                        }

                        tbody
                        {
                            @for entry in entries {
                                (entry_row(entry))
                            }
                        }
                    }
                }

                @if pages > 1 {
                    (pagination_view(current_page, pages, surrounding_pages))
                }
            }
        }
    };

    base("Entries", &content)
}

fn entry_row(entry: &LedgerEntry) -> Markup {
    let amount_style = match entry.entry_type {
        EntryType::Income => "text-green-600 dark:text-green-400",
        EntryType::Expense => "text-red-600 dark:text-red-400",
    };
    let signed_amount = match entry.entry_type {
        EntryType::Income => entry.amount,
        EntryType::Expense => -entry.amount,
    };
    let edit_url = format_endpoint(endpoints::EDIT_ENTRY_VIEW, entry.id);
    let delete_url = format_endpoint(endpoints::ENTRY_API, entry.id);

    html! {
        tr class=(TABLE_ROW_STYLE)
        {
            td class=(TABLE_CELL_STYLE) { (entry.date) }

            td class=(TABLE_CELL_STYLE)
            {
                (entry.vendor)

                @if entry.pending_sync {
                    " "
                    span class=(PENDING_BADGE_STYLE) { "awaiting sync" }
                }
            }

            td class={ (TABLE_CELL_STYLE) " " (amount_style) } { (format_won(signed_amount)) }
            td class=(TABLE_CELL_STYLE) { (format_won(entry.vat_amount)) }
            td class=(TABLE_CELL_STYLE) { (entry.memo) }

            td class=(TABLE_CELL_STYLE)
            {
                a href=(edit_url) class=(LINK_STYLE) { "Edit" }
                " "
                button
                    type="button"
                    class=(BUTTON_DELETE_STYLE)
                    hx-delete=(delete_url)
                    hx-target="closest tr"
                    hx-swap="outerHTML"
                    hx-confirm="Delete this entry?"
                {
                    "Delete"
                }
            }
        }
    }
}

fn pagination_view(current_page: u32, pages: u32, surrounding_pages: u32) -> Markup {
    let markers = page_markers(current_page, pages, surrounding_pages);

    html! {
        nav class="flex gap-2 my-4" aria-label="Entry list pages"
        {
            @for marker in markers {
                @match marker {
                    PageMarker::Current(page) => {
                        span class="px-3 py-1 rounded bg-blue-600 text-white" { (page) }
                    }
                    PageMarker::Page(page) => {
                        a
                            href={ (endpoints::ENTRIES_VIEW) "?page=" (page) }
                            class=(LINK_STYLE)
                        {
                            (page)
                        }
                    }
                    PageMarker::Gap => {
                        span class="px-1 text-gray-500" { "…" }
                    }
                }
            }
        }
    }
}
