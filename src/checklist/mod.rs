//! The e-filing checklist page: the guide steps for submitting a VAT
//! return plus the warning signals the tax engine detects in the
//! period's data.
//!
//! The guide template is versioned reference data served through the
//! Cache-First route; the signals go through Network-First so the page
//! still shows the last detected set when the engine is unreachable.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, Query, State},
    response::{IntoResponse, Response},
};
use axum_extra::extract::Form;
use maud::{Markup, html};
use rusqlite::Connection;
use serde::Deserialize;

use crate::{
    AppState, Error, endpoints,
    backend::{BackendClient, Envelope},
    cache::{CachedFetch, Freshness, fetch_through_cache},
    html::{
        BUTTON_PRIMARY_STYLE, CARD_STYLE, PAGE_CONTAINER_STYLE, base,
    },
    navigation::NavBar,
    period::Period,
    timezone::local_today,
};

/// One step of the filing guide.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GuideStep {
    /// A stable identifier, e.g. "data_input".
    pub id: String,
    /// The phase the step belongs to: "preparation", "calculation" or
    /// "submission".
    pub category: String,
    /// The step's heading.
    pub title: String,
    /// What to do for this step.
    pub description: String,
}

/// The payload of the guide template endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct GuideTemplate {
    steps: Vec<GuideStep>,
}

/// A warning the engine detected in the period's data, e.g. missing cash
/// receipts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Signal {
    /// The signal code, e.g. "NO_CASH_RECEIPT".
    pub code: String,
    /// A human-readable description of the problem.
    pub desc: String,
}

/// The payload of the signal detection endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct SignalsPayload {
    #[serde(default)]
    signals: Vec<Signal>,
}

/// The state needed for the checklist page and its refresh endpoint.
#[derive(Debug, Clone)]
pub struct ChecklistState {
    /// The database connection holding the response cache.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The tax engine client.
    pub backend: BackendClient,
    /// The local timezone as a canonical timezone name, e.g. "Asia/Seoul".
    pub local_timezone: String,
}

impl FromRef<AppState> for ChecklistState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            backend: state.backend.clone(),
            local_timezone: state.local_timezone.clone(),
        }
    }
}

/// The query parameters for the checklist page.
#[derive(Debug, Deserialize)]
pub struct ChecklistQuery {
    /// The period to check, defaulting to the current month.
    pub period: Option<String>,
}

/// A route handler for the e-filing checklist page.
pub async fn get_checklist_page(
    State(state): State<ChecklistState>,
    Query(query): Query<ChecklistQuery>,
) -> Response {
    let period = match resolve_period(query.period.as_deref(), &state.local_timezone) {
        Ok(period) => period,
        Err(error @ Error::InvalidPeriod(_)) => return error.into_alert_response(),
        Err(error) => return error.into_response(),
    };

    let steps = match fetch_guide_steps(&state).await {
        Ok(steps) => steps,
        Err(error) if error.is_transient() => {
            // No cached template and no engine; the page can still show
            // the signals section.
            tracing::warn!("no filing guide available: {error}");
            Vec::new()
        }
        Err(error) => return error.into_response(),
    };

    let signals_section = signals_section_for_period(&state, &period).await;

    checklist_view(&period, &steps, &signals_section).into_response()
}

/// The form data for the signal refresh endpoint.
#[derive(Debug, Deserialize)]
pub struct RefreshForm {
    /// The period to re-check.
    pub period: String,
}

/// A route handler that re-runs the engine's signal detection and
/// responds with the refreshed signals section.
pub async fn refresh_checklist_endpoint(
    State(state): State<ChecklistState>,
    Form(form): Form<RefreshForm>,
) -> Response {
    let period = match Period::parse(&form.period) {
        Ok(period) => period,
        Err(error) => return error.into_alert_response(),
    };

    let body = serde_json::json!({ "period": period.to_string(), "taxType": "VAT" });

    match state.backend.post("/prep/refresh", &body).await {
        Ok(envelope) => match envelope.decode_extra::<SignalsPayload>() {
            Ok(payload) => signals_view(&period, &payload.signals, false).into_response(),
            Err(error) => {
                tracing::error!("could not decode refreshed signals: {error}");
                error.into_alert_response()
            }
        },
        Err(error) => {
            tracing::warn!("could not refresh signals for {period}: {error}");
            error.into_alert_response()
        }
    }
}

fn resolve_period(period: Option<&str>, local_timezone: &str) -> Result<Period, Error> {
    match period {
        Some(text) => Period::parse(text),
        None => {
            let today = local_today(local_timezone)
                .ok_or_else(|| Error::InvalidTimezoneError(local_timezone.to_owned()))?;
            Ok(Period::containing(today))
        }
    }
}

async fn fetch_guide_steps(state: &ChecklistState) -> Result<Vec<GuideStep>, Error> {
    let fetched = fetch_through_cache(
        &state.backend,
        &state.db_connection,
        "/prep/template?tax_type=VAT",
    )
    .await?;

    let envelope: Envelope = serde_json::from_slice(&fetched.body)
        .map_err(|error| Error::InvalidEnvelope(error.to_string()))?;
    let template: GuideTemplate = envelope.decode_extra()?;

    Ok(template.steps)
}

/// Fetch the signals for `period`, rendering the offline note when only
/// a cached copy (or nothing) is available.
async fn signals_section_for_period(state: &ChecklistState, period: &Period) -> Markup {
    let path = format!("/prep/refresh?period={period}&taxType=VAT");

    match fetch_through_cache(&state.backend, &state.db_connection, &path).await {
        Ok(fetched) => match decode_signals(&fetched) {
            Ok(signals) => signals_view(period, &signals, fetched.served_from == Freshness::Cache),
            Err(error) => {
                tracing::error!("could not decode signals for {period}: {error}");
                signals_unavailable_view(period)
            }
        },
        Err(error) => {
            tracing::warn!("could not fetch signals for {period}: {error}");
            signals_unavailable_view(period)
        }
    }
}

fn decode_signals(fetched: &CachedFetch) -> Result<Vec<Signal>, Error> {
    let envelope: Envelope = serde_json::from_slice(&fetched.body)
        .map_err(|error| Error::InvalidEnvelope(error.to_string()))?;
    let payload: SignalsPayload = envelope.decode_extra()?;

    Ok(payload.signals)
}

fn checklist_view(period: &Period, steps: &[GuideStep], signals_section: &Markup) -> Markup {
    let nav_bar = NavBar::new(endpoints::CHECKLIST_VIEW).into_html();

    let categories = [
        ("preparation", "1. Prepare your data"),
        ("calculation", "2. Check the figures"),
        ("submission", "3. Submit on Hometax"),
    ];

    let content = html! {
        (nav_bar)

        div class=(PAGE_CONTAINER_STYLE)
        {
            h1 class="text-xl font-bold my-4" { "Filing checklist for " (period) }

            @if steps.is_empty() {
                p class="w-full max-w-3xl mb-4 text-sm text-amber-700 dark:text-amber-300"
                {
                    "The filing guide could not be loaded. It appears once the tax engine \
                    has been reached at least once."
                }
            } @else {
                @for (category, heading) in categories {
                    @let category_steps = steps
                        .iter()
                        .filter(|step| step.category == category)
                        .collect::<Vec<_>>();

                    @if !category_steps.is_empty() {
                        section class="w-full max-w-3xl mb-6"
                        {
                            h2 class="text-lg font-semibold mb-2" { (heading) }

                            ol class="space-y-2"
                            {
                                @for step in category_steps {
                                    li class=(CARD_STYLE)
                                    {
                                        p class="font-medium" { (step.title) }
                                        p class="text-sm text-gray-600 dark:text-gray-400"
                                        {
                                            (step.description)
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }

            (signals_section)
        }
    };

    base("Checklist", &content)
}

fn signals_view(period: &Period, signals: &[Signal], served_from_cache: bool) -> Markup {
    html! {
        section id="signals" class="w-full max-w-3xl"
        {
            div class="flex items-center justify-between mb-2"
            {
                h2 class="text-lg font-semibold" { "Detected issues" }

                form
                    hx-post=(endpoints::CHECKLIST_REFRESH_API)
                    hx-target="#signals"
                    hx-swap="outerHTML"
                {
                    input type="hidden" name="period" value=(period);

                    button type="submit" class={ (BUTTON_PRIMARY_STYLE) " max-w-32" }
                    {
                        "Re-check"
                    }
                }
            }

            @if served_from_cache {
                p class="mb-2 text-sm text-amber-700 dark:text-amber-300"
                {
                    "The tax engine is unreachable, showing the last detected issues."
                }
            }

            @if signals.is_empty() {
                p class="text-sm text-gray-600 dark:text-gray-400"
                {
                    "No issues detected for this period."
                }
            } @else {
                ul class="space-y-2"
                {
                    @for signal in signals {
                        li class=(CARD_STYLE)
                        {
                            p class="font-medium" { (signal.code) }
                            p class="text-sm text-gray-600 dark:text-gray-400" { (signal.desc) }
                        }
                    }
                }
            }
        }
    }
}

fn signals_unavailable_view(period: &Period) -> Markup {
    html! {
        section id="signals" class="w-full max-w-3xl"
        {
            h2 class="text-lg font-semibold mb-2" { "Detected issues" }

            p class="text-sm text-amber-700 dark:text-amber-300"
            {
                "Issue detection for " (period) " is unavailable while the tax engine \
                cannot be reached."
            }
        }
    }
}

#[cfg(test)]
mod checklist_tests {
    use std::net::SocketAddr;

    use axum::{
        Json, Router,
        extract::{Query, State},
        http::StatusCode,
        routing::get,
    };
    use axum_extra::extract::Form;
    use serde_json::json;

    use crate::app_state::test_utils::{offline_state, state_with_backend};

    use super::{
        ChecklistQuery, ChecklistState, RefreshForm, get_checklist_page,
        refresh_checklist_endpoint,
    };

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

    fn engine_router() -> Router {
        Router::new()
            .route(
                "/prep/template",
                get(|| async {
                    Json(json!({
                        "ok": true,
                        "steps": [
                            {"id": "data_input", "category": "preparation",
                             "title": "Enter your transactions",
                             "description": "Record entries or import a CSV."},
                            {"id": "final_review", "category": "submission",
                             "title": "Final review",
                             "description": "Confirm every figure before filing."},
                        ],
                    }))
                }),
            )
            .route(
                "/prep/refresh",
                get(|| async {
                    Json(json!({
                        "ok": true,
                        "generated": 1,
                        "signals": [
                            {"code": "NO_CASH_RECEIPT", "desc": "No cash receipts recorded."},
                        ],
                    }))
                })
                .post(|| async {
                    Json(json!({
                        "ok": true,
                        "generated": 0,
                        "signals": [],
                    }))
                }),
            )
    }

    fn checklist_state(app_state: &crate::AppState) -> ChecklistState {
        ChecklistState {
            db_connection: app_state.db_connection.clone(),
            backend: app_state.backend.clone(),
            local_timezone: app_state.local_timezone.clone(),
        }
    }

    async fn render_page(state: ChecklistState, period: Option<&str>) -> (StatusCode, String) {
        let response = get_checklist_page(
            State(state),
            Query(ChecklistQuery {
                period: period.map(str::to_owned),
            }),
        )
        .await;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn renders_guide_steps_and_signals() {
        let address = spawn_backend(engine_router()).await;
        let app_state = state_with_backend(&format!("http://{address}"));

        let (status, body) = render_page(checklist_state(&app_state), Some("2025-09")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Enter your transactions"));
        assert!(body.contains("Final review"));
        assert!(body.contains("NO_CASH_RECEIPT"));
    }

    #[tokio::test]
    async fn offline_page_still_renders() {
        let app_state = offline_state();

        let (status, body) = render_page(checklist_state(&app_state), Some("2025-09")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("unavailable while the tax engine"));
    }

    #[tokio::test]
    async fn second_visit_serves_the_guide_from_cache() {
        let address = spawn_backend(engine_router()).await;
        let app_state = state_with_backend(&format!("http://{address}"));

        // First visit populates the Cache-First template route.
        let (_, _) = render_page(checklist_state(&app_state), Some("2025-09")).await;

        // Point the client at a dead address; the guide must still come
        // from the cache.
        let offline = offline_state();
        let state = ChecklistState {
            db_connection: app_state.db_connection.clone(),
            backend: offline.backend.clone(),
            local_timezone: app_state.local_timezone.clone(),
        };

        let (status, body) = render_page(state, Some("2025-09")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Enter your transactions"));
    }

    #[tokio::test]
    async fn refresh_endpoint_rerenders_the_signals() {
        let address = spawn_backend(engine_router()).await;
        let app_state = state_with_backend(&format!("http://{address}"));

        let response = refresh_checklist_endpoint(
            State(checklist_state(&app_state)),
            Form(RefreshForm {
                period: "2025-09".to_owned(),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("No issues detected"));
    }

    #[tokio::test]
    async fn refresh_with_bad_period_is_rejected() {
        let app_state = offline_state();

        let response = refresh_checklist_endpoint(
            State(checklist_state(&app_state)),
            Form(RefreshForm {
                period: "bad".to_owned(),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
