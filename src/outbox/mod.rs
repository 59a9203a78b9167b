//! The offline outbox: ledger entries that could not reach the tax
//! engine, waiting to be replayed.
//!
//! This replaces the "queue in localStorage" pattern with an explicit
//! ordered list carrying a delivery state per item, so the at-least-once
//! semantics towards the engine are visible rather than implicit. Items
//! are replayed in queue order and marked delivered exactly once.

mod sync;

use rusqlite::{Connection, Row, params};
use time::OffsetDateTime;

use crate::{Error, entry::EntryPayload};

pub use sync::{SyncReport, sync_endpoint, sync_pending_entries};

/// The delivery state of an outbox item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Waiting to be replayed against the engine.
    Pending,
    /// Acknowledged by the engine; kept for bookkeeping.
    Delivered,
}

impl DeliveryState {
    fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Delivered => "delivered",
        }
    }
}

/// A queued create request for the tax engine.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxItem {
    /// The queue position; items replay in ascending id order.
    pub id: i64,
    /// The request body to deliver.
    pub payload: EntryPayload,
    /// Whether the item has been delivered.
    pub state: DeliveryState,
    /// When the item was queued.
    pub queued_at: OffsetDateTime,
    /// How many delivery attempts have been made.
    pub attempts: u32,
}

/// Create the outbox table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_outbox_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS outbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                queued_at TEXT NOT NULL,
                delivered_at TEXT,
                attempts INTEGER NOT NULL DEFAULT 0
                )",
        (),
    )?;

    Ok(())
}

/// Append a create request to the queue. Returns the queue id.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error, or an
/// [Error::JsonError] if the payload cannot be serialized.
pub fn enqueue(payload: &EntryPayload, connection: &Connection) -> Result<i64, Error> {
    let json = serde_json::to_string(payload)?;

    connection.execute(
        "INSERT INTO outbox (payload, state, queued_at) VALUES (?1, 'pending', ?2)",
        params![json, OffsetDateTime::now_utc()],
    )?;

    Ok(connection.last_insert_rowid())
}

/// The items still waiting for delivery, in queue order.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error, or an
/// [Error::JsonError] if a stored payload cannot be parsed.
pub fn pending_items(connection: &Connection) -> Result<Vec<OutboxItem>, Error> {
    connection
        .prepare(
            "SELECT id, payload, state, queued_at, attempts FROM outbox
             WHERE state = 'pending' ORDER BY id ASC",
        )?
        .query_map([], map_outbox_row)?
        .map(|maybe_item| maybe_item.map_err(Error::from))
        .collect()
}

/// How many items are waiting for delivery.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn pending_count(connection: &Connection) -> Result<u32, Error> {
    connection
        .query_row(
            "SELECT COUNT(id) FROM outbox WHERE state = 'pending'",
            [],
            |row| row.get(0),
        )
        .map_err(|error| error.into())
}

/// Transition an item from pending to delivered.
///
/// Returns `true` if this call performed the transition and `false` if
/// the item was already delivered (or does not exist). The state guard in
/// the WHERE clause is what makes delivery marking exactly-once even when
/// two syncs race.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn mark_delivered(id: i64, connection: &Connection) -> Result<bool, Error> {
    let rows_affected = connection.execute(
        "UPDATE outbox SET state = 'delivered', delivered_at = ?1
         WHERE id = ?2 AND state = 'pending'",
        params![OffsetDateTime::now_utc(), id],
    )?;

    Ok(rows_affected == 1)
}

/// Count a failed delivery attempt against an item.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn record_attempt(id: i64, connection: &Connection) -> Result<(), Error> {
    connection.execute(
        "UPDATE outbox SET attempts = attempts + 1 WHERE id = :id",
        &[(":id", &id)],
    )?;

    Ok(())
}

/// Replace the payload of a still-pending item, for edits made before the
/// entry ever reached the engine.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingEntry] if the item is missing or already delivered,
/// - or [Error::SqlError]/[Error::JsonError] for storage failures.
pub fn update_payload(
    id: i64,
    payload: &EntryPayload,
    connection: &Connection,
) -> Result<(), Error> {
    let json = serde_json::to_string(payload)?;

    let rows_affected = connection.execute(
        "UPDATE outbox SET payload = ?1 WHERE id = ?2 AND state = 'pending'",
        params![json, id],
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingEntry);
    }

    Ok(())
}

/// Drop a still-pending item from the queue, for entries deleted before
/// they ever reached the engine.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn cancel(id: i64, connection: &Connection) -> Result<bool, Error> {
    let rows_affected = connection.execute(
        "DELETE FROM outbox WHERE id = :id AND state = 'pending'",
        &[(":id", &id)],
    )?;

    Ok(rows_affected == 1)
}

fn map_outbox_row(row: &Row) -> Result<OutboxItem, rusqlite::Error> {
    let json: String = row.get(1)?;
    let payload = serde_json::from_str(&json).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            error.to_string().into(),
        )
    })?;

    let raw_state: String = row.get(2)?;
    let state = match raw_state.as_str() {
        "pending" => DeliveryState::Pending,
        "delivered" => DeliveryState::Delivered,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown delivery state \"{other}\"").into(),
            ));
        }
    };

    Ok(OutboxItem {
        id: row.get(0)?,
        payload,
        state,
        queued_at: row.get(3)?,
        attempts: row.get(4)?,
    })
}

#[cfg(test)]
mod outbox_tests {
    use rusqlite::Connection;

    use crate::{db::initialize, entry::core::test_utils::sample_payload};

    use super::{
        DeliveryState, cancel, enqueue, mark_delivered, pending_count, pending_items,
        record_attempt, update_payload,
    };

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    #[test]
    fn items_replay_in_queue_order() {
        let conn = get_test_connection();
        let first = enqueue(&sample_payload("First"), &conn).unwrap();
        let second = enqueue(&sample_payload("Second"), &conn).unwrap();

        let items = pending_items(&conn).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, first);
        assert_eq!(items[1].id, second);
        assert_eq!(items[0].payload.vendor, "First");
        assert!(items.iter().all(|item| item.state == DeliveryState::Pending));
    }

    #[test]
    fn mark_delivered_is_exactly_once() {
        let conn = get_test_connection();
        let id = enqueue(&sample_payload("Acme"), &conn).unwrap();

        assert!(mark_delivered(id, &conn).unwrap());
        // The second marking must be a no-op.
        assert!(!mark_delivered(id, &conn).unwrap());
        assert_eq!(pending_count(&conn).unwrap(), 0);
    }

    #[test]
    fn delivered_items_leave_the_pending_queue() {
        let conn = get_test_connection();
        let delivered = enqueue(&sample_payload("Done"), &conn).unwrap();
        let waiting = enqueue(&sample_payload("Waiting"), &conn).unwrap();
        mark_delivered(delivered, &conn).unwrap();

        let items = pending_items(&conn).unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, waiting);
    }

    #[test]
    fn attempts_accumulate() {
        let conn = get_test_connection();
        let id = enqueue(&sample_payload("Flaky"), &conn).unwrap();

        record_attempt(id, &conn).unwrap();
        record_attempt(id, &conn).unwrap();

        assert_eq!(pending_items(&conn).unwrap()[0].attempts, 2);
    }

    #[test]
    fn update_payload_only_while_pending() {
        let conn = get_test_connection();
        let id = enqueue(&sample_payload("Before"), &conn).unwrap();

        let mut edited = sample_payload("After");
        edited.amount = 20_000.0;
        update_payload(id, &edited, &conn).unwrap();

        assert_eq!(pending_items(&conn).unwrap()[0].payload, edited);

        mark_delivered(id, &conn).unwrap();
        assert!(update_payload(id, &edited, &conn).is_err());
    }

    #[test]
    fn cancel_removes_pending_items_only() {
        let conn = get_test_connection();
        let pending = enqueue(&sample_payload("Cancel me"), &conn).unwrap();
        let delivered = enqueue(&sample_payload("Keep me"), &conn).unwrap();
        mark_delivered(delivered, &conn).unwrap();

        assert!(cancel(pending, &conn).unwrap());
        assert!(!cancel(delivered, &conn).unwrap());
        assert_eq!(pending_count(&conn).unwrap(), 0);
    }
}
