//! Alert messages swapped into the fixed alert container, the app's
//! replacement for toast notifications.

use axum::response::{IntoResponse, Response};
use maud::{Markup, html};

const SUCCESS_STYLE: &str = "flex items-start gap-3 p-4 mb-2 rounded-lg border \
    border-green-300 bg-green-50 text-green-800 \
    dark:border-green-800 dark:bg-gray-800 dark:text-green-400";

const ERROR_STYLE: &str = "flex items-start gap-3 p-4 mb-2 rounded-lg border \
    border-red-300 bg-red-50 text-red-800 \
    dark:border-red-800 dark:bg-gray-800 dark:text-red-400";

const WARNING_STYLE: &str = "flex items-start gap-3 p-4 mb-2 rounded-lg border \
    border-amber-300 bg-amber-50 text-amber-800 \
    dark:border-amber-700 dark:bg-gray-800 dark:text-amber-300";

/// A message to show the user after an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// The operation succeeded.
    Success {
        message: String,
        details: String,
    },
    /// The operation succeeded, no details needed.
    SuccessSimple {
        message: String,
    },
    /// The operation completed with a caveat, e.g. an entry was saved
    /// locally and will sync later.
    Warning {
        message: String,
        details: String,
    },
    /// The operation failed.
    Error {
        message: String,
        details: String,
    },
    /// The operation failed, no details needed.
    ErrorSimple {
        message: String,
    },
}

impl Alert {
    /// Render the alert targeting the alert container with an
    /// out-of-band swap, so alerts work no matter what the main swap
    /// target of a request is.
    pub fn into_html(self) -> Markup {
        let (style, message, details) = match self {
            Alert::Success { message, details } => (SUCCESS_STYLE, message, details),
            Alert::SuccessSimple { message } => (SUCCESS_STYLE, message, String::new()),
            Alert::Warning { message, details } => (WARNING_STYLE, message, details),
            Alert::Error { message, details } => (ERROR_STYLE, message, details),
            Alert::ErrorSimple { message } => (ERROR_STYLE, message, String::new()),
        };

        html! {
            div id="alert-container" hx-swap-oob="innerHTML"
            {
                div class=(style) role="alert"
                {
                    div
                    {
                        p class="font-medium" { (message) }

                        @if !details.is_empty() {
                            p class="text-sm" { (details) }
                        }
                    }

                    button
                        type="button"
                        class="ms-auto text-sm font-medium"
                        onclick="this.closest('[role=alert]').remove()"
                    {
                        "✕"
                    }
                }
            }
        }
    }
}

impl IntoResponse for Alert {
    fn into_response(self) -> Response {
        // The status code has to be 200 OK or HTMX will not swap the
        // alert into table-row targets.
        self.into_html().into_response()
    }
}
