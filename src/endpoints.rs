//! The API endpoint URIs.
//!
//! For endpoints that take a parameter, e.g., '/entries/{entry_id}/edit', use [format_endpoint].

/// The root route which redirects to the dashboard.
pub const ROOT: &str = "/";
/// The landing page with summary cards and the sync banner.
pub const DASHBOARD_VIEW: &str = "/dashboard";
/// The page listing the local ledger.
pub const ENTRIES_VIEW: &str = "/entries";
/// The page for recording a new ledger entry.
pub const NEW_ENTRY_VIEW: &str = "/entries/new";
/// The page for editing an existing ledger entry.
pub const EDIT_ENTRY_VIEW: &str = "/entries/{entry_id}/edit";
/// The page for importing ledger entries from CSV files.
pub const IMPORT_VIEW: &str = "/entries/import";
/// The page showing the VAT estimate for a period.
pub const ESTIMATE_VIEW: &str = "/estimate";
/// The page showing the e-filing checklist.
pub const CHECKLIST_VIEW: &str = "/checklist";
/// The route for static files.
pub const STATIC: &str = "/static";

/// The route to create a ledger entry.
pub const ENTRIES_API: &str = "/api/entries";
/// The route to update or delete a single ledger entry.
pub const ENTRY_API: &str = "/api/entries/{entry_id}";
/// The route to upload CSV files for importing entries.
pub const IMPORT_API: &str = "/api/import";
/// The route that replays the offline outbox against the tax engine.
pub const SYNC_API: &str = "/api/sync";
/// The route that re-runs the filing signal detection.
pub const CHECKLIST_REFRESH_API: &str = "/api/checklist/refresh";
/// The route for the polled connection status banner.
pub const STATUS_API: &str = "/api/status";

/// Replace the parameter in `endpoint_path` with `id`.
///
/// A parameter is a string that starts with a left brace, followed by
/// lowercase letters or underscores, and ends with a right brace.
/// For example, in the endpoint path '/entries/{entry_id}/edit',
/// '{entry_id}' is the parameter.
///
/// This function assumes that an endpoint path only contains ASCII
/// characters and a single parameter. If no parameter is found in
/// `endpoint_path`, the function returns the original `endpoint_path`.
pub fn format_endpoint(endpoint_path: &str, id: i64) -> String {
    let Some(param_start) = endpoint_path.find('{') else {
        return endpoint_path.to_string();
    };

    let param_end = endpoint_path[param_start..]
        .find('}')
        .map(|offset| param_start + offset + 1)
        .unwrap_or(endpoint_path.len());

    format!(
        "{}{}{}",
        &endpoint_path[..param_start],
        id,
        &endpoint_path[param_end..]
    )
}
