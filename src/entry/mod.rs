//! Ledger entry management.
//!
//! This module contains everything related to ledger entries:
//! - The `LedgerEntry` model, the engine wire types, and the local cache table
//! - View handlers for the entries list and the new/edit forms
//! - Endpoints that round-trip entries through the tax engine, falling
//!   back to the outbox when the engine is unreachable

pub(crate) mod core;
mod create_endpoint;
mod delete_endpoint;
mod edit_endpoint;
mod edit_page;
mod entries_page;
mod form;
mod new_entry_page;

pub use core::{
    EntryPayload, EntrySource, EntryType, LedgerEntry, RemoteEntry, count_entries,
    create_entry_table, get_entry, import_id_exists, income_expense_totals, insert_pending_entry,
    insert_synced_entry, list_entries, recent_entries, reconcile_entry, replace_synced_entries,
};
pub use create_endpoint::create_entry_endpoint;
pub use delete_endpoint::delete_entry_endpoint;
pub use edit_endpoint::edit_entry_endpoint;
pub use edit_page::get_edit_entry_page;
pub use entries_page::get_entries_page;
pub use new_entry_page::get_new_entry_page;
