//! Parsing the EasyTax ledger CSV format.
//!
//! The expected columns are `date,vendor,type,amount,vat,memo`. The
//! `type` and `vat` columns are optional: rows without a type default to
//! expense, and blank or malformed numbers are coerced to zero, matching
//! the tolerant behaviour of the engine's own CSV ingestion. Rows without
//! a parseable date or a vendor are skipped with a warning rather than
//! failing the whole file.

use serde::Deserialize;
use time::{Date, format_description::BorrowedFormatItem, macros::format_description};

use crate::{
    Error,
    entry::{EntryPayload, EntrySource, EntryType},
};

const DATE_FORMAT: &[BorrowedFormatItem] = format_description!("[year]-[month]-[day]");

/// One parsed row plus the import id that deduplicates it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    /// The validated create request for the row.
    pub payload: EntryPayload,
    /// A hash of the row content. Importing the same row twice produces
    /// the same id, which the ledger table rejects.
    pub import_id: i64,
}

/// The result of parsing a ledger CSV document.
#[derive(Debug, Default)]
pub struct ParseLedgerResult {
    /// The rows that parsed cleanly.
    pub rows: Vec<ImportRow>,
    /// How many rows were skipped because they could not be parsed.
    pub skipped: u32,
}

#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(default)]
    date: String,
    #[serde(default)]
    vendor: String,
    #[serde(default, rename = "type")]
    entry_type: String,
    #[serde(default)]
    amount: String,
    #[serde(default)]
    vat: String,
    #[serde(default)]
    memo: String,
}

/// Parse ledger CSV `text` into validated create requests.
///
/// `today` caps entry dates, as for the entry form.
///
/// # Errors
/// Returns [Error::InvalidCsv] if the document has no usable header;
/// individual bad rows are counted in the result instead of failing the
/// parse.
pub fn parse_ledger_csv(text: &str, today: Date) -> Result<ParseLedgerResult, Error> {
    let mut reader = ::csv::ReaderBuilder::new()
        .trim(::csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|error| Error::InvalidCsv(error.to_string()))?
        .clone();

    if !headers.iter().any(|header| header == "date")
        || !headers.iter().any(|header| header == "vendor")
    {
        return Err(Error::InvalidCsv(
            "expected a header row with at least 'date' and 'vendor' columns".to_owned(),
        ));
    }

    let mut result = ParseLedgerResult::default();

    for (index, record) in reader.deserialize::<CsvRecord>().enumerate() {
        let line = index + 2;

        let record = match record {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!("skipping CSV line {line}: {error}");
                result.skipped += 1;
                continue;
            }
        };

        match parse_record(&record, today) {
            Ok(row) => result.rows.push(row),
            Err(error) => {
                tracing::warn!("skipping CSV line {line}: {error}");
                result.skipped += 1;
            }
        }
    }

    Ok(result)
}

fn parse_record(record: &CsvRecord, today: Date) -> Result<ImportRow, Error> {
    let date = Date::parse(&record.date, DATE_FORMAT)
        .map_err(|_| Error::InvalidCsv(format!("\"{}\" is not a YYYY-MM-DD date", record.date)))?;

    let entry_type = match record.entry_type.as_str() {
        "income" => EntryType::Income,
        // The engine's CSV exports do not carry a type column; treat
        // anything else as a purchase.
        _ => EntryType::Expense,
    };

    let amount = coerce_number(&record.amount, "amount");
    let vat = coerce_number(&record.vat, "vat");

    let payload = EntryPayload::new(
        date,
        &record.vendor,
        entry_type,
        amount,
        vat,
        &record.memo,
        EntrySource::Upload,
        today,
    )?;

    Ok(ImportRow {
        import_id: create_import_id(&payload),
        payload,
    })
}

/// Turn a CSV number cell into an amount, treating blanks and garbage as
/// zero the way the engine's own ingestion does.
fn coerce_number(text: &str, column: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }

    match text.replace(',', "").parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!("could not parse {column} value \"{text}\", using 0");
            0.0
        }
    }
}

/// Creates a hash for an imported row based on its date, vendor, amounts
/// and memo, so re-importing an overlapping CSV skips the rows that are
/// already in the ledger.
fn create_import_id(payload: &EntryPayload) -> i64 {
    let fingerprint = format!(
        "{}|{}|{}|{:.2}|{:.2}|{}",
        payload.trx_date,
        payload.vendor,
        payload.transaction_type,
        payload.amount,
        payload.vat_amount,
        payload.memo,
    );

    let digest = md5::compute(fingerprint.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.0[..8]);

    i64::from_le_bytes(bytes)
}
