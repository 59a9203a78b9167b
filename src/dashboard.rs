//! The dashboard page: summary cards, the connection status banner and
//! the most recent entries.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, State},
    response::{IntoResponse, Response},
};
use maud::{Markup, html};
use rusqlite::Connection;

use crate::{
    AppState, Error, endpoints,
    backend::{BackendClient, Envelope},
    cache::fetch_through_cache,
    entry::{LedgerEntry, income_expense_totals, recent_entries},
    estimate::TaxEstimate,
    html::{
        CARD_LABEL_STYLE, CARD_STYLE, CARD_VALUE_STYLE, LINK_STYLE, PAGE_CONTAINER_STYLE,
        PENDING_BADGE_STYLE, TABLE_CELL_STYLE, TABLE_HEADER_STYLE, TABLE_ROW_STYLE, base,
        format_won,
    },
    navigation::NavBar,
    period::Period,
    status::status_banner_placeholder,
    timezone::local_today,
};

const RECENT_ENTRY_COUNT: u32 = 5;

/// The state needed to render the dashboard.
#[derive(Debug, Clone)]
pub struct DashboardState {
    /// The database connection holding the ledger and the response cache.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The tax engine client.
    pub backend: BackendClient,
    /// The local timezone as a canonical timezone name, e.g. "Asia/Seoul".
    pub local_timezone: String,
}

impl FromRef<AppState> for DashboardState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            backend: state.backend.clone(),
            local_timezone: state.local_timezone.clone(),
        }
    }
}

/// A route handler for the dashboard page.
pub async fn get_dashboard_page(State(state): State<DashboardState>) -> Response {
    let Some(today) = local_today(&state.local_timezone) else {
        return Error::InvalidTimezoneError(state.local_timezone).into_response();
    };
    let period = Period::containing(today);

    let due_vat = fetch_due_vat(&state, &period).await;

    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    let (income, expense) = match income_expense_totals(&connection) {
        Ok(totals) => totals,
        Err(error) => return error.into_response(),
    };

    let recent = match recent_entries(RECENT_ENTRY_COUNT, &connection) {
        Ok(recent) => recent,
        Err(error) => return error.into_response(),
    };

    dashboard_view(&period, income, expense, due_vat, &recent).into_response()
}

/// The estimated VAT due for `period`, or `None` when neither the engine
/// nor the cache can answer. The dashboard renders a dash rather than
/// failing.
async fn fetch_due_vat(state: &DashboardState, period: &Period) -> Option<f64> {
    let path = format!("/tax/estimate?period={period}");

    let fetched = match fetch_through_cache(&state.backend, &state.db_connection, &path).await {
        Ok(fetched) => fetched,
        Err(error) => {
            tracing::debug!("no VAT estimate for the dashboard: {error}");
            return None;
        }
    };

    let envelope: Envelope = serde_json::from_slice(&fetched.body).ok()?;
    let estimate: TaxEstimate = envelope.decode_extra().ok()?;

    Some(estimate.estimated_due_vat)
}

fn dashboard_view(
    period: &Period,
    income: f64,
    expense: f64,
    due_vat: Option<f64>,
    recent: &[LedgerEntry],
) -> Markup {
    let nav_bar = NavBar::new(endpoints::DASHBOARD_VIEW).into_html();

    let content = html! {
        (nav_bar)

        div class=(PAGE_CONTAINER_STYLE)
        {
            div class="w-full max-w-3xl mb-4" { (status_banner_placeholder()) }

            div class="grid w-full max-w-3xl grid-cols-1 gap-4 sm:grid-cols-2 lg:grid-cols-4"
            {
                (card("Total income", format_won(income)))
                (card("Total expenses", format_won(expense)))
                (card("Net", format_won(income - expense)))
                (card(
                    &format!("VAT due ({period})"),
                    due_vat.map(format_won).unwrap_or_else(|| "—".to_owned()),
                ))
            }

            div class="flex w-full max-w-3xl items-center justify-between mt-8 mb-2"
            {
                h2 class="text-lg font-semibold" { "Recent entries" }

                a href=(endpoints::ENTRIES_VIEW) class=(LINK_STYLE) { "See all" }
            }

            @if recent.is_empty() {
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
                            }
                        }

                        tbody
                        {
                            @for entry in recent {
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

                                    td class=(TABLE_CELL_STYLE) { (format_won(entry.amount)) }
                                }
                            }
                        }
                    }
                }
            }
        }
    };

    base("Dashboard", &content)
}

fn card(label: &str, value: String) -> Markup {
    html! {
        div class=(CARD_STYLE)
        {
            p class=(CARD_LABEL_STYLE) { (label) }
            p class=(CARD_VALUE_STYLE) { (value) }
        }
    }
}
