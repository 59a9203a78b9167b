//! Defines the core data models and database queries for ledger entries.
//!
//! The local `entry` table is a cache of the tax engine's ledger plus any
//! rows created while the engine was unreachable. Rows created offline
//! have no remote id and `pending_sync` set until the outbox replays them.

use std::{fmt::Display, str::FromStr};

use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::Error;

// ============================================================================
// MODELS
// ============================================================================

/// Whether an entry records money coming in or going out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// A sale, money received.
    Income,
    /// A purchase, money spent.
    Expense,
}

impl EntryType {
    /// The wire and database representation of the entry type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Income => "income",
            EntryType::Expense => "expense",
        }
    }
}

impl Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(EntryType::Income),
            "expense" => Ok(EntryType::Expense),
            other => Err(format!("unknown entry type \"{other}\"")),
        }
    }
}

/// How an entry got into the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    /// Typed into the entry form.
    Direct,
    /// Parsed from an uploaded CSV file.
    Upload,
}

impl EntrySource {
    /// The database representation of the source.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySource::Direct => "direct",
            EntrySource::Upload => "upload",
        }
    }
}

impl FromStr for EntrySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(EntrySource::Direct),
            "upload" => Ok(EntrySource::Upload),
            other => Err(format!("unknown entry source \"{other}\"")),
        }
    }
}

/// A ledger entry as stored locally.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    /// The local row id. This is what pages and endpoints address.
    pub id: i64,
    /// The id the tax engine assigned, once the entry has been synced.
    pub remote_id: Option<i64>,
    /// When the transaction happened.
    pub date: Date,
    /// The business the money came from or went to.
    pub vendor: String,
    /// Income or expense.
    pub entry_type: EntryType,
    /// The transaction amount in won.
    pub amount: f64,
    /// The VAT portion of the amount in won.
    pub vat_amount: f64,
    /// A free-text note.
    pub memo: String,
    /// Whether the entry was typed in or imported.
    pub source: EntrySource,
    /// When the entry was recorded locally.
    pub created_at: OffsetDateTime,
    /// True while the entry only exists locally and awaits delivery to
    /// the engine.
    pub pending_sync: bool,
    /// The outbox item that will deliver this entry, while pending.
    pub outbox_id: Option<i64>,
    /// A content hash for imported rows, used to skip duplicate imports.
    pub import_id: Option<i64>,
}

/// The JSON body for creating or updating an entry on the tax engine.
///
/// Field names follow the engine's schema, which is why they differ from
/// the local model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPayload {
    /// The transaction date as `YYYY-MM-DD`.
    pub trx_date: Date,
    /// The vendor name.
    pub vendor: String,
    /// Income or expense.
    pub transaction_type: EntryType,
    /// The transaction amount.
    pub amount: f64,
    /// The VAT portion of the amount.
    pub vat_amount: f64,
    /// A free-text note.
    pub memo: String,
    /// The engine's name for the source of the entry.
    pub source: String,
}

impl EntryPayload {
    /// Build a validated payload.
    ///
    /// # Errors
    /// Returns [Error::EmptyVendor] if the vendor is blank,
    /// [Error::InvalidAmount] if the amount is not positive, or
    /// [Error::FutureDate] if the date is after `today`.
    pub fn new(
        date: Date,
        vendor: &str,
        entry_type: EntryType,
        amount: f64,
        vat_amount: f64,
        memo: &str,
        source: EntrySource,
        today: Date,
    ) -> Result<Self, Error> {
        let vendor = vendor.trim();

        if vendor.is_empty() {
            return Err(Error::EmptyVendor);
        }

        if !(amount > 0.0) {
            return Err(Error::InvalidAmount(amount));
        }

        if date > today {
            return Err(Error::FutureDate(date));
        }

        Ok(Self {
            trx_date: date,
            vendor: vendor.to_owned(),
            transaction_type: entry_type,
            amount,
            vat_amount: vat_amount.max(0.0),
            memo: memo.trim().to_owned(),
            source: match source {
                EntrySource::Direct => "direct_input".to_owned(),
                EntrySource::Upload => "csv_upload".to_owned(),
            },
        })
    }

    fn local_source(&self) -> EntrySource {
        if self.source == "csv_upload" {
            EntrySource::Upload
        } else {
            EntrySource::Direct
        }
    }
}

/// An entry as the tax engine returns it in the `data` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteEntry {
    /// The engine-assigned id.
    pub id: i64,
    /// The transaction date as `YYYY-MM-DD`.
    pub trx_date: Date,
    /// The vendor name.
    pub vendor: String,
    /// Income or expense.
    pub transaction_type: EntryType,
    /// The transaction amount.
    pub amount: f64,
    /// The VAT portion of the amount.
    #[serde(default)]
    pub vat_amount: f64,
    /// A free-text note.
    #[serde(default)]
    pub memo: String,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the entry table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_entry_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS entry (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_id INTEGER UNIQUE,
                date TEXT NOT NULL,
                vendor TEXT NOT NULL,
                entry_type TEXT NOT NULL,
                amount REAL NOT NULL,
                vat_amount REAL NOT NULL,
                memo TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                pending_sync INTEGER NOT NULL DEFAULT 0,
                outbox_id INTEGER,
                import_id INTEGER UNIQUE
                )",
        (),
    )?;

    // The list page sorts newest first.
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_entry_date ON entry(date DESC, id DESC);",
        (),
    )?;

    Ok(())
}

/// Store an entry the tax engine has acknowledged.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn insert_synced_entry(
    remote: &RemoteEntry,
    source: EntrySource,
    import_id: Option<i64>,
    connection: &Connection,
) -> Result<LedgerEntry, Error> {
    let entry = connection
        .prepare(
            "INSERT INTO entry
             (remote_id, date, vendor, entry_type, amount, vat_amount, memo, source, created_at,
              pending_sync, outbox_id, import_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, NULL, ?10)
             RETURNING id, remote_id, date, vendor, entry_type, amount, vat_amount, memo, source,
                       created_at, pending_sync, outbox_id, import_id",
        )?
        .query_row(
            params![
                remote.id,
                remote.trx_date,
                remote.vendor,
                remote.transaction_type.as_str(),
                remote.amount,
                remote.vat_amount,
                remote.memo,
                source.as_str(),
                OffsetDateTime::now_utc(),
                import_id,
            ],
            map_entry_row,
        )?;

    Ok(entry)
}

/// Store an entry that could not reach the tax engine, tied to the outbox
/// item that will deliver it.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn insert_pending_entry(
    payload: &EntryPayload,
    outbox_id: i64,
    import_id: Option<i64>,
    connection: &Connection,
) -> Result<LedgerEntry, Error> {
    let entry = connection
        .prepare(
            "INSERT INTO entry
             (remote_id, date, vendor, entry_type, amount, vat_amount, memo, source, created_at,
              pending_sync, outbox_id, import_id)
             VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10)
             RETURNING id, remote_id, date, vendor, entry_type, amount, vat_amount, memo, source,
                       created_at, pending_sync, outbox_id, import_id",
        )?
        .query_row(
            params![
                payload.trx_date,
                payload.vendor,
                payload.transaction_type.as_str(),
                payload.amount,
                payload.vat_amount,
                payload.memo,
                payload.local_source().as_str(),
                OffsetDateTime::now_utc(),
                outbox_id,
                import_id,
            ],
            map_entry_row,
        )?;

    Ok(entry)
}

/// Retrieve an entry by its local `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid entry,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_entry(id: i64, connection: &Connection) -> Result<LedgerEntry, Error> {
    let entry = connection
        .prepare(
            "SELECT id, remote_id, date, vendor, entry_type, amount, vat_amount, memo, source,
                    created_at, pending_sync, outbox_id, import_id
             FROM entry WHERE id = :id",
        )?
        .query_row(&[(":id", &id)], map_entry_row)?;

    Ok(entry)
}

/// Retrieve a page of entries, newest first.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn list_entries(
    limit: u32,
    offset: u32,
    connection: &Connection,
) -> Result<Vec<LedgerEntry>, Error> {
    connection
        .prepare(
            "SELECT id, remote_id, date, vendor, entry_type, amount, vat_amount, memo, source,
                    created_at, pending_sync, outbox_id, import_id
             FROM entry ORDER BY date DESC, id DESC LIMIT :limit OFFSET :offset",
        )?
        .query_map(
            &[(":limit", &(limit as i64)), (":offset", &(offset as i64))],
            map_entry_row,
        )?
        .map(|maybe_entry| maybe_entry.map_err(Error::from))
        .collect()
}

/// The most recently dated entries, for the dashboard.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn recent_entries(count: u32, connection: &Connection) -> Result<Vec<LedgerEntry>, Error> {
    list_entries(count, 0, connection)
}

/// Get the total number of entries in the local ledger.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is some SQL error.
pub fn count_entries(connection: &Connection) -> Result<u32, Error> {
    connection
        .query_row("SELECT COUNT(id) FROM entry;", [], |row| row.get(0))
        .map_err(|error| error.into())
}

/// The summed income and expense amounts across the local ledger.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn income_expense_totals(connection: &Connection) -> Result<(f64, f64), Error> {
    connection
        .query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN entry_type = 'income' THEN amount END), 0.0),
                COALESCE(SUM(CASE WHEN entry_type = 'expense' THEN amount END), 0.0)
             FROM entry;",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|error| error.into())
}

/// Whether an imported row with this `import_id` is already in the ledger.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn import_id_exists(import_id: i64, connection: &Connection) -> Result<bool, Error> {
    let count: u32 = connection.query_row(
        "SELECT COUNT(id) FROM entry WHERE import_id = :import_id",
        &[(":import_id", &import_id)],
        |row| row.get(0),
    )?;

    Ok(count > 0)
}

/// Replace the synced portion of the local ledger with the engine's
/// current list. Pending rows are left alone, they are not on the engine
/// yet.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn replace_synced_entries(
    remote_entries: &[RemoteEntry],
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute("DELETE FROM entry WHERE pending_sync = 0", ())?;

    let mut insert = connection.prepare(
        "INSERT INTO entry
         (remote_id, date, vendor, entry_type, amount, vat_amount, memo, source, created_at,
          pending_sync, outbox_id, import_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'direct', ?8, 0, NULL, NULL)",
    )?;

    for remote in remote_entries {
        insert.execute(params![
            remote.id,
            remote.trx_date,
            remote.vendor,
            remote.transaction_type.as_str(),
            remote.amount,
            remote.vat_amount,
            remote.memo,
            OffsetDateTime::now_utc(),
        ])?;
    }

    Ok(())
}

/// Record that the outbox delivered a pending entry: store the
/// engine-assigned id and clear the pending flag.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingEntry] if no pending entry references `outbox_id`,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn reconcile_entry(outbox_id: i64, remote_id: i64, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE entry SET remote_id = :remote_id, pending_sync = 0, outbox_id = NULL
         WHERE outbox_id = :outbox_id AND pending_sync = 1",
        &[(":remote_id", &remote_id), (":outbox_id", &outbox_id)],
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingEntry);
    }

    Ok(())
}

/// Overwrite the user-editable fields of a local entry.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingEntry] if `id` does not refer to a valid entry,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_local_entry(
    id: i64,
    payload: &EntryPayload,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE entry SET date = ?1, vendor = ?2, entry_type = ?3, amount = ?4, vat_amount = ?5,
                memo = ?6
         WHERE id = ?7",
        params![
            payload.trx_date,
            payload.vendor,
            payload.transaction_type.as_str(),
            payload.amount,
            payload.vat_amount,
            payload.memo,
            id,
        ],
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingEntry);
    }

    Ok(())
}

type RowsAffected = usize;

/// Remove an entry from the local ledger.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn delete_entry(id: i64, connection: &Connection) -> Result<RowsAffected, Error> {
    connection
        .execute("DELETE FROM entry WHERE id = :id", &[(":id", &id)])
        .map_err(Error::from)
}

/// Map a database row to a [LedgerEntry].
pub fn map_entry_row(row: &Row) -> Result<LedgerEntry, rusqlite::Error> {
    let raw_type: String = row.get(4)?;
    let entry_type = raw_type.parse().map_err(|message: String| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, message.into())
    })?;

    let raw_source: String = row.get(8)?;
    let source = raw_source.parse().map_err(|message: String| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, message.into())
    })?;

    Ok(LedgerEntry {
        id: row.get(0)?,
        remote_id: row.get(1)?,
        date: row.get(2)?,
        vendor: row.get(3)?,
        entry_type,
        amount: row.get(5)?,
        vat_amount: row.get(6)?,
        memo: row.get(7)?,
        source,
        created_at: row.get(9)?,
        pending_sync: row.get(10)?,
        outbox_id: row.get(11)?,
        import_id: row.get(12)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
