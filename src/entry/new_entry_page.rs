//! Defines the page with the form for recording a new ledger entry.

use axum::{
    extract::{FromRef, State},
    response::{IntoResponse, Response},
};
use maud::html;

use crate::{
    AppState, Error, endpoints,
    entry::form::{EntryFormDefaults, entry_form_fields},
    html::{BUTTON_PRIMARY_STYLE, FORM_CONTAINER_STYLE, base},
    navigation::NavBar,
    timezone::local_today,
};

/// The state needed to render the new entry page.
#[derive(Debug, Clone)]
pub struct NewEntryPageState {
    /// The local timezone as a canonical timezone name, e.g. "Asia/Seoul".
    pub local_timezone: String,
}

impl FromRef<AppState> for NewEntryPageState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            local_timezone: state.local_timezone.clone(),
        }
    }
}

/// A route handler for the page with the new entry form.
pub async fn get_new_entry_page(State(state): State<NewEntryPageState>) -> Response {
    let Some(today) = local_today(&state.local_timezone) else {
        return Error::InvalidTimezoneError(state.local_timezone).into_response();
    };

    let nav_bar = NavBar::new(endpoints::NEW_ENTRY_VIEW).into_html();
    let form_fields = entry_form_fields(&EntryFormDefaults::empty(today));

    let content = html! {
        (nav_bar)

        div class=(FORM_CONTAINER_STYLE)
        {
            h1 class="text-xl font-bold my-4" { "Record an entry" }

            form
                hx-post=(endpoints::ENTRIES_API)
                hx-target-error="#alert-container"
                class="w-full space-y-4 md:space-y-6"
            {
                (form_fields)

                button type="submit" class=(BUTTON_PRIMARY_STYLE) { "Save entry" }
            }
        }
    };

    base("New Entry", &content).into_response()
}

#[cfg(test)]
mod new_entry_page_tests {
    use axum::extract::State;
    use scraper::{Html, Selector};

    use crate::endpoints;

    use super::{NewEntryPageState, get_new_entry_page};

    async fn render_page() -> Html {
        let state = NewEntryPageState {
            local_timezone: "Etc/UTC".to_owned(),
        };

        let response = get_new_entry_page(State(state)).await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        Html::parse_document(&String::from_utf8_lossy(&body))
    }

    #[tokio::test]
    async fn form_posts_to_the_entries_api() {
        let document = render_page().await;
        let selector = Selector::parse("form").unwrap();

        let form = document.select(&selector).next().expect("want a form");

        assert_eq!(form.value().attr("hx-post"), Some(endpoints::ENTRIES_API));
    }

    #[tokio::test]
    async fn form_has_the_entry_fields() {
        let document = render_page().await;

        for name in ["entry_type", "date", "vendor", "amount", "vat_amount", "memo"] {
            let selector = Selector::parse(&format!("[name={name}]")).unwrap();
            assert!(
                document.select(&selector).next().is_some(),
                "want an input named {name}"
            );
        }
    }
}
