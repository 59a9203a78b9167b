//! The connection status banner, polled by the dashboard.
//!
//! Each poll probes the tax engine's health endpoint once, without
//! retries, and reports the number of entries awaiting sync with a
//! button to replay the outbox.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, State},
    response::{IntoResponse, Response},
};
use maud::{Markup, html};
use rusqlite::Connection;

use crate::{
    AppState, Error, endpoints,
    backend::{BackendClient, RetryPolicy},
    outbox,
};

/// The state needed to render the status banner.
#[derive(Debug, Clone)]
pub struct StatusState {
    /// The database connection holding the outbox.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The tax engine client.
    pub backend: BackendClient,
}

impl FromRef<AppState> for StatusState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            backend: state.backend.clone(),
        }
    }
}

/// A route handler for the polled status banner partial.
pub async fn get_status_banner(State(state): State<StatusState>) -> Response {
    let online = state
        .backend
        .with_retry(RetryPolicy::none())
        .get("/health")
        .await
        .is_ok();

    let pending = {
        let connection = match state.db_connection.lock() {
            Ok(connection) => connection,
            Err(error) => {
                tracing::error!("could not acquire database lock: {error}");
                return Error::DatabaseLockError.into_response();
            }
        };

        match outbox::pending_count(&connection) {
            Ok(pending) => pending,
            Err(error) => return error.into_response(),
        }
    };

    status_banner_view(online, pending).into_response()
}

/// The placeholder the dashboard embeds; it loads the banner immediately
/// and then re-polls it every 30 seconds.
pub fn status_banner_placeholder() -> Markup {
    html! {
        div
            id="status-banner"
            hx-get=(endpoints::STATUS_API)
            hx-trigger="load, every 30s"
            hx-swap="outerHTML"
        {}
    }
}

fn status_banner_view(online: bool, pending: u32) -> Markup {
    let (dot_style, text) = if online {
        (
            "inline-block h-2.5 w-2.5 rounded-full bg-green-500",
            "Connected to the tax engine",
        )
    } else {
        (
            "inline-block h-2.5 w-2.5 rounded-full bg-red-500",
            "Offline, new entries are saved locally",
        )
    };

    html! {
        div
            id="status-banner"
            hx-get=(endpoints::STATUS_API)
            hx-trigger="every 30s"
            hx-swap="outerHTML"
            class="flex w-full max-w-3xl items-center gap-3 rounded-lg bg-white p-3 shadow dark:bg-gray-800"
        {
            span class=(dot_style) {}
            span class="text-sm" { (text) }

            @if pending > 0 {
                span class="text-sm text-amber-700 dark:text-amber-300"
                {
                    (pending) " entries awaiting sync"
                }

                button
                    type="button"
                    class="ms-auto rounded bg-blue-500 px-3 py-1 text-sm text-white hover:bg-blue-600"
                    hx-post=(endpoints::SYNC_API)
                    hx-swap="none"
                {
                    "Sync now"
                }
            }
        }
    }
}
