use maud::{Markup, html};
use time::Date;

use crate::{
    entry::core::EntryType,
    html::{
        FORM_LABEL_STYLE, FORM_RADIO_GROUP_STYLE, FORM_RADIO_INPUT_STYLE, FORM_RADIO_LABEL_STYLE,
        FORM_TEXT_INPUT_STYLE,
    },
};

/// The values an entry form is rendered with: today's date and empty
/// fields for a new entry, or the stored values when editing.
pub struct EntryFormDefaults<'a> {
    pub entry_type: EntryType,
    pub date: Date,
    pub max_date: Date,
    pub vendor: Option<&'a str>,
    pub amount: Option<f64>,
    pub vat_amount: Option<f64>,
    pub memo: Option<&'a str>,
}

impl<'a> EntryFormDefaults<'a> {
    /// The defaults for an empty form: an income entry dated `today`.
    pub fn empty(today: Date) -> Self {
        Self {
            entry_type: EntryType::Income,
            date: today,
            max_date: today,
            vendor: None,
            amount: None,
            vat_amount: None,
            memo: None,
        }
    }
}

pub fn entry_form_fields(defaults: &EntryFormDefaults<'_>) -> Markup {
    let is_income = matches!(defaults.entry_type, EntryType::Income);
    let amount_str = defaults.amount.map(|amount| format!("{amount:.0}"));
    let vat_str = defaults.vat_amount.map(|vat| format!("{vat:.0}"));

    html! {
        fieldset class="space-y-2"
        {
            legend class=(FORM_LABEL_STYLE) { "Entry type" }

            div class=(FORM_RADIO_GROUP_STYLE)
            {
                div class="flex items-center gap-3"
                {
                    input
                        name="entry_type"
                        id="entry-type-income"
                        type="radio"
                        value="income"
                        checked[is_income]
                        required
                        class=(FORM_RADIO_INPUT_STYLE);

                    label
                        for="entry-type-income"
                        class=(FORM_RADIO_LABEL_STYLE)
                    {
                        "Income"
                    }
                }

                div class="flex items-center gap-3"
                {
                    input
                        name="entry_type"
                        id="entry-type-expense"
                        type="radio"
                        value="expense"
                        checked[!is_income]
                        required
                        class=(FORM_RADIO_INPUT_STYLE);

                    label
                        for="entry-type-expense"
                        class=(FORM_RADIO_LABEL_STYLE)
                    {
                        "Expense"
                    }
                }
            }
        }

        div
        {
            label
                for="date"
                class=(FORM_LABEL_STYLE)
            {
                "Date"
            }

            input
                name="date"
                id="date"
                type="date"
                max=(defaults.max_date)
                value=(defaults.date)
                required
                class=(FORM_TEXT_INPUT_STYLE);
        }

        div
        {
            label
                for="vendor"
                class=(FORM_LABEL_STYLE)
            {
                "Vendor"
            }

            input
                name="vendor"
                id="vendor"
                type="text"
                placeholder="Business name"
                value=[defaults.vendor]
                required
                autofocus
                class=(FORM_TEXT_INPUT_STYLE);
        }

        div
        {
            label
                for="amount"
                class=(FORM_LABEL_STYLE)
            {
                "Amount (₩)"
            }

            input
                name="amount"
                id="amount"
                type="number"
                step="1"
                min="1"
                placeholder="10000"
                value=[amount_str.as_deref()]
                required
                class=(FORM_TEXT_INPUT_STYLE);
        }

        div
        {
            label
                for="vat_amount"
                class=(FORM_LABEL_STYLE)
            {
                "VAT amount (₩)"
            }

            input
                name="vat_amount"
                id="vat_amount"
                type="number"
                step="1"
                min="0"
                placeholder="0"
                value=[vat_str.as_deref()]
                class=(FORM_TEXT_INPUT_STYLE);
        }

        div
        {
            label
                for="memo"
                class=(FORM_LABEL_STYLE)
            {
                "Memo"
            }

            input
                name="memo"
                id="memo"
                type="text"
                placeholder="Optional note"
                value=[defaults.memo]
                class=(FORM_TEXT_INPUT_STYLE);
        }
    }
}
