//! Defines the page for uploading ledger CSV files.

use axum::response::{IntoResponse, Response};
use maud::html;

use crate::{
    endpoints,
    html::{BUTTON_PRIMARY_STYLE, FORM_CONTAINER_STYLE, FORM_LABEL_STYLE, base},
    navigation::NavBar,
};

/// A route handler for the CSV import page.
pub async fn get_import_page() -> Response {
    let nav_bar = NavBar::new(endpoints::IMPORT_VIEW).into_html();

    let content = html! {
        (nav_bar)

        div class=(FORM_CONTAINER_STYLE)
        {
            h1 class="text-xl font-bold my-4" { "Import entries" }

            p class="mb-4 text-sm text-gray-600 dark:text-gray-400"
            {
                "Upload a ledger CSV with the columns "
                code { "date,vendor,type,amount,vat,memo" }
                ". Rows already in the ledger are skipped automatically."
            }

            form
                hx-post=(endpoints::IMPORT_API)
                hx-encoding="multipart/form-data"
                hx-target-error="#alert-container"
                class="w-full space-y-4 md:space-y-6"
            {
                div
                {
                    label
                        for="files"
                        class=(FORM_LABEL_STYLE)
                    {
                        "CSV files"
                    }

                    input
                        name="files"
                        id="files"
                        type="file"
                        accept=".csv,text/csv"
                        multiple
                        required
                        class="block w-full text-sm text-gray-900 dark:text-white";
                }

                button type="submit" class=(BUTTON_PRIMARY_STYLE) { "Import" }
            }
        }
    };

    base("Import", &content).into_response()
}

#[cfg(test)]
mod import_page_tests {
    use scraper::{Html, Selector};

    use crate::endpoints;

    use super::get_import_page;

    #[tokio::test]
    async fn form_uploads_to_the_import_api() {
        let response = get_import_page().await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let document = Html::parse_document(&String::from_utf8_lossy(&body));

        let form = document
            .select(&Selector::parse("form").unwrap())
            .next()
            .expect("want a form");

        assert_eq!(form.value().attr("hx-post"), Some(endpoints::IMPORT_API));
        assert_eq!(
            form.value().attr("hx-encoding"),
            Some("multipart/form-data")
        );
    }
}
