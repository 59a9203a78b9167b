//! Application router configuration.

use axum::{
    Router,
    response::Redirect,
    routing::{delete, get, post, put},
};
use tower_http::services::ServeDir;

use crate::{
    AppState,
    checklist::{get_checklist_page, refresh_checklist_endpoint},
    csv_import::{get_import_page, import_entries_endpoint},
    dashboard::get_dashboard_page,
    endpoints,
    entry::{
        create_entry_endpoint, delete_entry_endpoint, edit_entry_endpoint, get_edit_entry_page,
        get_entries_page, get_new_entry_page,
    },
    estimate::get_estimate_page,
    not_found::get_404_not_found,
    outbox::sync_endpoint,
    status::get_status_banner,
};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    let view_routes = Router::new()
        .route(endpoints::ROOT, get(get_index_page))
        .route(endpoints::DASHBOARD_VIEW, get(get_dashboard_page))
        .route(endpoints::ENTRIES_VIEW, get(get_entries_page))
        .route(endpoints::NEW_ENTRY_VIEW, get(get_new_entry_page))
        .route(endpoints::EDIT_ENTRY_VIEW, get(get_edit_entry_page))
        .route(endpoints::IMPORT_VIEW, get(get_import_page))
        .route(endpoints::ESTIMATE_VIEW, get(get_estimate_page))
        .route(endpoints::CHECKLIST_VIEW, get(get_checklist_page));

    let api_routes = Router::new()
        .route(endpoints::ENTRIES_API, post(create_entry_endpoint))
        .route(endpoints::ENTRY_API, put(edit_entry_endpoint))
        .route(endpoints::ENTRY_API, delete(delete_entry_endpoint))
        .route(endpoints::IMPORT_API, post(import_entries_endpoint))
        .route(endpoints::SYNC_API, post(sync_endpoint))
        .route(
            endpoints::CHECKLIST_REFRESH_API,
            post(refresh_checklist_endpoint),
        )
        .route(endpoints::STATUS_API, get(get_status_banner));

    view_routes
        .merge(api_routes)
        .nest_service(endpoints::STATIC, ServeDir::new("static/"))
        .fallback(get_404_not_found)
        .with_state(state)
}

/// The root path '/' redirects to the dashboard page.
async fn get_index_page() -> Redirect {
    Redirect::to(endpoints::DASHBOARD_VIEW)
}
