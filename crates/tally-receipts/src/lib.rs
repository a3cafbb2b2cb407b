//! Tamper-evident receipts: an append-only SQLite ledger with hash chaining.
//!
//! Each stored receipt carries `hash = SHA-256(prev_hash? || payload || signature)`, where
//! `prev_hash` is the hash of the row appended immediately before it. Editing, deleting or
//! reordering any stored row breaks a link that `verify_chain` recomputes from scratch.

mod issuer;
mod store;

pub use issuer::{IssueError, ReceiptIssuer, verify_receipt_signature};
pub use store::{ChainFault, ChainStatus, Ledger, LedgerError, LedgerOptions, SqliteLedger};
