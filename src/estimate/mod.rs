//! The VAT estimate page, the app's view of `GET /tax/estimate`.
//!
//! Estimates are derived figures, so the route is served through the
//! Stale-While-Revalidate cache strategy: the last known figures render
//! immediately while a background fetch refreshes them.

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
    backend::{BackendClient, Envelope},
    cache::{CachedFetch, Freshness, fetch_through_cache},
    html::{
        BUTTON_PRIMARY_STYLE, CARD_LABEL_STYLE, CARD_STYLE, CARD_VALUE_STYLE, FORM_LABEL_STYLE,
        FORM_TEXT_INPUT_STYLE, PAGE_CONTAINER_STYLE, base, format_won,
    },
    navigation::NavBar,
    period::Period,
    timezone::local_today,
};

/// The figures the tax engine returns for a period, flat next to the
/// `ok` flag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaxEstimate {
    /// VAT collected on sales.
    #[serde(default)]
    pub sales_vat: f64,
    /// VAT paid on purchases.
    #[serde(default)]
    pub purchase_vat: f64,
    /// Purchase VAT that cannot be deducted.
    #[serde(default)]
    pub non_deductible_vat: f64,
    /// The VAT to pay: sales minus deductible purchases, floored at zero.
    #[serde(default)]
    pub estimated_due_vat: f64,
}

/// The state needed to render the estimate page.
#[derive(Debug, Clone)]
pub struct EstimatePageState {
    /// The database connection holding the response cache.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The tax engine client.
    pub backend: BackendClient,
    /// The local timezone as a canonical timezone name, e.g. "Asia/Seoul".
    pub local_timezone: String,
}

impl FromRef<AppState> for EstimatePageState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            backend: state.backend.clone(),
            local_timezone: state.local_timezone.clone(),
        }
    }
}

/// The query parameters for the estimate page.
#[derive(Debug, Deserialize)]
pub struct EstimateQuery {
    /// The period to estimate, defaulting to the current month.
    pub period: Option<String>,
}

/// A route handler for the VAT estimate page.
pub async fn get_estimate_page(
    State(state): State<EstimatePageState>,
    Query(query): Query<EstimateQuery>,
) -> Response {
    let period = match resolve_period(&query, &state.local_timezone) {
        Ok(period) => period,
        Err(error @ Error::InvalidPeriod(_)) => return error.into_alert_response(),
        Err(error) => return error.into_response(),
    };

    let path = format!("/tax/estimate?period={period}");

    match fetch_through_cache(&state.backend, &state.db_connection, &path).await {
        Ok(fetched) => match decode_estimate(&fetched) {
            Ok(estimate) => estimate_view(&period, &estimate, &fetched).into_response(),
            Err(error) => {
                tracing::error!("could not decode estimate for {period}: {error}");
                error.into_response()
            }
        },
        Err(error) if error.is_transient() => {
            // Unreachable engine and nothing cached: render the page shell
            // with the offline notice instead of an error page.
            estimate_unavailable_view(&period).into_response()
        }
        Err(error) => {
            tracing::error!("could not fetch estimate for {period}: {error}");
            error.into_response()
        }
    }
}

fn resolve_period(query: &EstimateQuery, local_timezone: &str) -> Result<Period, Error> {
    match &query.period {
        Some(text) => Period::parse(text),
        None => {
            let today = local_today(local_timezone)
                .ok_or_else(|| Error::InvalidTimezoneError(local_timezone.to_owned()))?;
            Ok(Period::containing(today))
        }
    }
}

fn decode_estimate(fetched: &CachedFetch) -> Result<TaxEstimate, Error> {
    let envelope: Envelope = serde_json::from_slice(&fetched.body)
        .map_err(|error| Error::InvalidEnvelope(error.to_string()))?;

    if !envelope.is_success() {
        return Err(Error::InvalidEnvelope(
            "the cached estimate reports a failure".to_owned(),
        ));
    }

    envelope.decode_extra()
}

fn period_form(period: &Period) -> Markup {
    html! {
        form
            method="get"
            action=(endpoints::ESTIMATE_VIEW)
            class="flex w-full max-w-3xl items-end gap-4 mb-6"
        {
            div
            {
                label
                    for="period"
                    class=(FORM_LABEL_STYLE)
                {
                    "Period"
                }

                input
                    name="period"
                    id="period"
                    type="month"
                    value=(period)
                    required
                    class=(FORM_TEXT_INPUT_STYLE);
            }

            button type="submit" class={ (BUTTON_PRIMARY_STYLE) " max-w-32" } { "Estimate" }
        }
    }
}

fn estimate_view(period: &Period, estimate: &TaxEstimate, fetched: &CachedFetch) -> Markup {
    let nav_bar = NavBar::new(endpoints::ESTIMATE_VIEW).into_html();

    let content = html! {
        (nav_bar)

        div class=(PAGE_CONTAINER_STYLE)
        {
            h1 class="text-xl font-bold my-4" { "VAT estimate for " (period) }

            (period_form(period))

            @if fetched.served_from == Freshness::Cache {
                p class="w-full max-w-3xl mb-4 text-sm text-amber-700 dark:text-amber-300"
                {
                    "Showing cached figures"
                    @if let Some(cached_at) = fetched.cached_at {
                        " from " (cached_at.date())
                    }
                    ", refreshing in the background."
                }
            }

            div class="grid w-full max-w-3xl grid-cols-1 gap-4 sm:grid-cols-2"
            {
                (estimate_card("Sales VAT", estimate.sales_vat))
                (estimate_card("Purchase VAT", estimate.purchase_vat))
                (estimate_card("Non-deductible VAT", estimate.non_deductible_vat))
                (estimate_card("Estimated VAT due", estimate.estimated_due_vat))
            }
        }
    };

    base("Estimate", &content)
}

fn estimate_unavailable_view(period: &Period) -> Markup {
    let nav_bar = NavBar::new(endpoints::ESTIMATE_VIEW).into_html();

    let content = html! {
        (nav_bar)

        div class=(PAGE_CONTAINER_STYLE)
        {
            h1 class="text-xl font-bold my-4" { "VAT estimate for " (period) }

            (period_form(period))

            p class="w-full max-w-3xl text-sm text-amber-700 dark:text-amber-300"
            {
                "The tax engine is unreachable and no cached estimate exists for this period yet. \
                Figures appear once the engine has been reached at least once."
            }
        }
    };

    base("Estimate", &content)
}

fn estimate_card(label: &str, amount: f64) -> Markup {
    html! {
        div class=(CARD_STYLE)
        {
            p class=(CARD_LABEL_STYLE) { (label) }
            p class=(CARD_VALUE_STYLE) { (format_won(amount)) }
        }
    }
}

#[cfg(test)]
mod estimate_page_tests {
    use std::net::SocketAddr;

    use axum::{
        Json, Router,
        extract::{Query, State},
        http::StatusCode,
        routing::get,
    };
    use serde_json::json;

    use crate::{
        app_state::test_utils::{offline_state, state_with_backend},
        backend::RawResponse,
        cache,
    };

    use super::{EstimatePageState, EstimateQuery, get_estimate_page};

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

    fn page_state(app_state: &crate::AppState) -> EstimatePageState {
        EstimatePageState {
            db_connection: app_state.db_connection.clone(),
            backend: app_state.backend.clone(),
            local_timezone: app_state.local_timezone.clone(),
        }
    }

    async fn render_body(state: EstimatePageState, period: Option<&str>) -> (StatusCode, String) {
        let response = get_estimate_page(
            State(state),
            Query(EstimateQuery {
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
    async fn renders_fetched_figures() {
        let router = Router::new().route(
            "/tax/estimate",
            get(|| async {
                Json(json!({
                    "ok": true,
                    "period": "2025-09",
                    "sales_vat": 40000.0,
                    "purchase_vat": 46000.0,
                    "non_deductible_vat": 800.0,
                    "estimated_due_vat": 0.0,
                }))
            }),
        );
        let address = spawn_backend(router).await;
        let app_state = state_with_backend(&format!("http://{address}"));

        let (status, body) = render_body(page_state(&app_state), Some("2025-09")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("₩40,000"));
        assert!(body.contains("₩46,000"));
        assert!(!body.contains("cached figures"));
    }

    #[tokio::test]
    async fn serves_cached_figures_with_notice_when_offline() {
        let app_state = offline_state();
        {
            let connection = app_state.db_connection.lock().unwrap();
            cache::store(
                "/tax/estimate?period=2025-09",
                &RawResponse {
                    body: br#"{"ok":true,"period":"2025-09","sales_vat":12345.0,
                        "purchase_vat":0.0,"non_deductible_vat":0.0,"estimated_due_vat":12345.0}"#
                        .to_vec(),
                    content_type: "application/json".to_owned(),
                },
                &connection,
            )
            .unwrap();
        }

        let (status, body) = render_body(page_state(&app_state), Some("2025-09")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("₩12,345"));
        assert!(body.contains("cached figures"), "want the staleness notice");
    }

    #[tokio::test]
    async fn offline_without_cache_renders_the_notice_shell() {
        let app_state = offline_state();

        let (status, body) = render_body(page_state(&app_state), Some("2025-09")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("unreachable"));
    }

    #[tokio::test]
    async fn malformed_period_is_rejected() {
        let app_state = offline_state();

        let (status, _body) = render_body(page_state(&app_state), Some("september")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
