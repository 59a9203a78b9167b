//! EasyTax is a web app that helps small businesses keep a ledger and
//! prepare their VAT filing.
//!
//! This library provides a REST API that directly serves HTML pages. The
//! heavy lifting (classification, tax maths) happens in an external tax
//! engine; this app is a resilient client over that engine's REST API with
//! a local response cache and an offline outbox for ledger entries created
//! while the engine is unreachable.

use std::{net::SocketAddr, time::Duration};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use time::Date;
use tokio::signal;

mod alert;
mod app_state;
mod backend;
mod cache;
mod checklist;
mod csv_import;
mod dashboard;
mod db;
mod endpoints;
mod entry;
mod estimate;
mod html;
mod internal_server_error;
mod navigation;
mod not_found;
mod outbox;
mod pagination;
mod period;
mod routing;
mod status;
mod timezone;

pub use app_state::AppState;
pub use backend::{BackendClient, RetryPolicy};
pub use db::initialize as initialize_db;
pub use pagination::PaginationConfig;
pub use routing::build_router;

use crate::{alert::Alert, internal_server_error::InternalServerError, not_found::get_404_not_found_response};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An entry was submitted without a vendor name.
    #[error("the vendor name cannot be empty")]
    EmptyVendor,

    /// An entry was submitted with a zero or negative amount.
    #[error("{0} is not a valid entry amount, amounts must be positive")]
    InvalidAmount(f64),

    /// A date in the future was used to create a ledger entry.
    ///
    /// Entries record events that have already happened, therefore future
    /// dates are not allowed.
    #[error("{0} is a date in the future, which is not allowed")]
    FutureDate(Date),

    /// A reporting period string was not of the form `YYYY-MM`.
    #[error("\"{0}\" is not a valid period, expected YYYY-MM")]
    InvalidPeriod(String),

    /// The tax engine could not be reached, or kept failing transiently
    /// until the retry budget ran out.
    ///
    /// Callers with an offline fallback (the outbox, the response cache)
    /// should use it when they see this error.
    #[error("the tax engine is unreachable: {0}")]
    BackendUnavailable(String),

    /// The tax engine answered with a terminal (non-retryable) failure,
    /// either a non-2xx status or a `success: false` envelope.
    #[error("the tax engine rejected the request (HTTP {status}): {message}")]
    BackendRejected {
        /// The HTTP status code of the response.
        status: u16,
        /// The message from the response envelope, or the status text.
        message: String,
    },

    /// A response from the tax engine could not be parsed as the expected
    /// JSON envelope.
    #[error("could not parse the tax engine response: {0}")]
    InvalidEnvelope(String),

    /// The multipart form could not be parsed as a list of CSV files.
    #[error("could not parse multipart form: {0}")]
    MultipartError(String),

    /// The uploaded file is not a CSV file.
    #[error("file is not a CSV")]
    NotCsv,

    /// The CSV had issues that prevented it from being parsed.
    #[error("could not parse the CSV file: {0}")]
    InvalidCsv(String),

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock.
    #[error("could not acquire the database lock")]
    DatabaseLockError,

    /// An error occurred while serializing or deserializing JSON.
    #[error("could not convert to or from JSON: {0}")]
    JsonError(String),

    /// An error occurred while getting the local timezone from a canonical timezone string.
    #[error("invalid timezone {0}")]
    InvalidTimezoneError(String),

    /// The HTTP client for the tax engine could not be constructed.
    #[error("could not build the HTTP client: {0}")]
    HttpClientError(String),

    /// Tried to delete a ledger entry that does not exist.
    #[error("tried to delete an entry that is not in the local ledger")]
    DeleteMissingEntry,

    /// Tried to update a ledger entry that does not exist.
    #[error("tried to update an entry that is not in the local ledger")]
    UpdateMissingEntry,
}

impl Error {
    /// Whether the error is transient: the request may succeed if tried
    /// again later, and offline fallbacks apply.
    ///
    /// Transport failures (connect, timeout) and HTTP 5xx/429 are
    /// transient; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        // rusqlite and reqwest errors are not comparable, so compare the
        // rendered messages instead.
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.to_string() == other.to_string()
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            Error::BackendUnavailable(format!("request timed out: {value}"))
        } else if value.is_connect() {
            Error::BackendUnavailable(format!("could not connect: {value}"))
        } else if value.is_decode() {
            Error::InvalidEnvelope(value.to_string())
        } else {
            Error::BackendUnavailable(value.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::JsonError(value.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::NotFound => get_404_not_found_response(),
            Error::InvalidTimezoneError(timezone) => InternalServerError {
                description: "Invalid Timezone Settings",
                fix: &format!(
                    "Could not get local timezone \"{timezone}\". Check your server settings and \
                    ensure the timezone has been set to a valid, canonical timezone string"
                ),
            }
            .into_response(),
            // Any errors that are not handled above are not intended to be shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                InternalServerError::default().into_response()
            }
        }
    }
}

impl Error {
    fn into_alert_response(self) -> Response {
        match self {
            Error::EmptyVendor => alert_response(
                StatusCode::BAD_REQUEST,
                Alert::ErrorSimple {
                    message: "Enter a vendor name before saving the entry.".to_owned(),
                },
            ),
            Error::InvalidAmount(amount) => alert_response(
                StatusCode::BAD_REQUEST,
                Alert::Error {
                    message: "Invalid amount".to_owned(),
                    details: format!("{amount} is not a valid amount. Enter an amount above zero."),
                },
            ),
            Error::FutureDate(date) => alert_response(
                StatusCode::BAD_REQUEST,
                Alert::Error {
                    message: "Invalid entry date".to_owned(),
                    details: format!(
                        "{date} is a date in the future, which is not allowed. \
                        Change the date to today or earlier."
                    ),
                },
            ),
            Error::InvalidPeriod(period) => alert_response(
                StatusCode::BAD_REQUEST,
                Alert::Error {
                    message: "Invalid period".to_owned(),
                    details: format!("\"{period}\" is not a valid period. Use the format YYYY-MM."),
                },
            ),
            Error::BackendUnavailable(reason) => {
                tracing::warn!("tax engine unreachable: {reason}");

                alert_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    Alert::Error {
                        message: "The tax engine is unreachable".to_owned(),
                        details: "Check your connection and try again. \
                            New entries are saved locally and synced later."
                            .to_owned(),
                    },
                )
            }
            Error::BackendRejected { status, message } => alert_response(
                StatusCode::BAD_GATEWAY,
                Alert::Error {
                    message: "The tax engine rejected the request".to_owned(),
                    details: format!("HTTP {status}: {message}"),
                },
            ),
            Error::NotCsv => alert_response(
                StatusCode::BAD_REQUEST,
                Alert::ErrorSimple {
                    message: "File type must be CSV.".to_owned(),
                },
            ),
            Error::InvalidCsv(reason) => alert_response(
                StatusCode::BAD_REQUEST,
                Alert::Error {
                    message: "Could not read the CSV file".to_owned(),
                    details: reason,
                },
            ),
            Error::UpdateMissingEntry => alert_response(
                StatusCode::NOT_FOUND,
                Alert::Error {
                    message: "Could not update entry".to_owned(),
                    details: "The entry could not be found.".to_owned(),
                },
            ),
            Error::DeleteMissingEntry => alert_response(
                StatusCode::NOT_FOUND,
                Alert::Error {
                    message: "Could not delete entry".to_owned(),
                    details: "The entry could not be found. \
                    Try refreshing the page to see if the entry has already been deleted."
                        .to_owned(),
                },
            ),
            error => {
                tracing::error!("An unexpected error occurred: {}", error);

                alert_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Alert::Error {
                        message: "Something went wrong".to_owned(),
                        details:
                            "An unexpected error occurred, check the server logs for more details."
                                .to_owned(),
                    },
                )
            }
        }
    }
}

fn alert_response(status_code: StatusCode, alert: Alert) -> Response {
    (status_code, alert.into_html()).into_response()
}
