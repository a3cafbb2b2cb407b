use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use tally_core::{Receipt, util::chain_hash};
use thiserror::Error;
use tokio_rusqlite::Connection;
use tracing::{debug, error, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct LedgerOptions {
    pub path: PathBuf,
}

impl LedgerOptions {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    /// The computed hash already exists. Either a digest collision or two writers raced on
    /// the same tail; the caller decides whether to retry with a fresh tail.
    #[error("integrity violation: hash {hash} is already in the ledger")]
    DuplicateHash { hash: String },
    #[error("integrity violation: receipt id {id} is already in the ledger")]
    DuplicateId { id: String },
    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Why a chain walk stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainFault {
    /// The stored `prev_hash` does not point at the preceding row.
    LinkMismatch {
        expected: Option<String>,
        found: Option<String>,
    },
    /// Row content no longer hashes to the stored `hash`.
    HashMismatch { expected: String, found: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainStatus {
    Intact {
        receipts: u64,
    },
    Broken {
        /// Zero-based position in insertion order.
        index: u64,
        id: String,
        fault: ChainFault,
    },
}

impl ChainStatus {
    pub fn is_intact(&self) -> bool {
        matches!(self, ChainStatus::Intact { .. })
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Hash of the most recently committed receipt, `None` for an empty ledger.
    async fn last_hash(&self) -> Result<Option<String>, LedgerError>;

    /// Links `receipt` to the current tail and persists it.
    ///
    /// `prev_hash` and `hash` are always overwritten; whatever the caller put there is
    /// ignored. On error the receipt is left untouched.
    async fn append(&self, receipt: &mut Receipt) -> Result<(), LedgerError>;

    /// Recomputes every link from genesis. `Ok(false)` means tampering, not a failure.
    async fn verify_chain(&self) -> Result<bool, LedgerError>;
}

#[derive(Debug, Clone)]
pub struct SqliteLedger {
    conn: Connection,
}

enum Insert {
    Committed {
        prev_hash: Option<String>,
        hash: String,
    },
    Conflict(LedgerError),
}

impl SqliteLedger {
    pub async fn open(opts: LedgerOptions) -> Result<Self, LedgerError> {
        if let Some(parent) = opts.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create ledger dir {}", parent.display()))?;
        }

        let conn = Connection::open(&opts.path).await.map_err(call_err)?;
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS receipts (
                  id          TEXT PRIMARY KEY,
                  payload     BLOB NOT NULL,
                  signature   BLOB NOT NULL,
                  prev_hash   TEXT,
                  hash        TEXT NOT NULL UNIQUE,
                  created_at  TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_receipts_hash ON receipts(hash);
                "#,
            )?;
            Ok(())
        })
        .await
        .map_err(call_err)?;

        debug!(path = %opts.path.display(), "opened receipt ledger");
        Ok(Self { conn })
    }

    /// Full chain walk with the position and cause of the first fault.
    ///
    /// Runs inside one read transaction so a concurrent append cannot be half-observed.
    pub async fn audit_chain(&self) -> Result<ChainStatus, LedgerError> {
        let status = self
            .conn
            .call(|conn| {
                let tx = conn.transaction()?;
                let status = {
                    let mut stmt = tx.prepare(
                        "SELECT id, payload, signature, prev_hash, hash
                         FROM receipts ORDER BY rowid ASC",
                    )?;
                    let mut rows = stmt.query([])?;

                    let mut expected_prev: Option<String> = None;
                    let mut index: u64 = 0;
                    let mut broken = None;
                    while let Some(row) = rows.next()? {
                        let id: String = row.get(0)?;
                        let payload: Vec<u8> = row.get(1)?;
                        let signature: Vec<u8> = row.get(2)?;
                        let prev_hash: Option<String> = row.get(3)?;
                        let hash: String = row.get(4)?;

                        let step = check_link(
                            expected_prev.as_deref(),
                            &payload,
                            &signature,
                            prev_hash,
                            hash,
                        );
                        match step {
                            Ok(computed) => expected_prev = Some(computed),
                            Err(fault) => {
                                broken = Some(ChainStatus::Broken { index, id, fault });
                                break;
                            }
                        }
                        index += 1;
                    }
                    broken.unwrap_or(ChainStatus::Intact { receipts: index })
                };
                tx.commit()?;
                Ok(status)
            })
            .await
            .map_err(call_err)?;

        if let ChainStatus::Broken { index, id, fault } = &status {
            warn!(index, id = %id, fault = ?fault, "receipt chain broken");
        }
        Ok(status)
    }

    /// Newest first.
    pub async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Receipt>, LedgerError> {
        // SQLite reads a negative LIMIT as unbounded and a negative OFFSET as zero.
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, payload, signature, prev_hash, hash, created_at
                     FROM receipts ORDER BY rowid DESC LIMIT ?1 OFFSET ?2",
                )?;
                let rows = stmt.query_map(params![limit, offset], receipt_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(call_err)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Receipt>, LedgerError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, payload, signature, prev_hash, hash, created_at
                         FROM receipts WHERE id = ?1",
                        params![id],
                        receipt_from_row,
                    )
                    .optional()?)
            })
            .await
            .map_err(call_err)
    }

    pub async fn count(&self) -> Result<u64, LedgerError> {
        let n: i64 = self
            .conn
            .call(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM receipts", [], |row| {
                    row.get(0)
                })?)
            })
            .await
            .map_err(call_err)?;
        Ok(u64::try_from(n).unwrap_or_default())
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn last_hash(&self) -> Result<Option<String>, LedgerError> {
        self.conn
            .call(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT hash FROM receipts ORDER BY rowid DESC LIMIT 1",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await
            .map_err(call_err)
    }

    async fn append(&self, receipt: &mut Receipt) -> Result<(), LedgerError> {
        let id = receipt.id.clone();
        let payload = receipt.payload.clone();
        let signature = receipt.signature.clone();
        let created_at = receipt.created_at.clone();

        let insert = self
            .conn
            .call(move |conn| {
                // IMMEDIATE takes the write lock before the tail is read, so no other writer
                // can commit between the read and the insert.
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let prev_hash: Option<String> = tx
                    .query_row(
                        "SELECT hash FROM receipts ORDER BY rowid DESC LIMIT 1",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;
                let hash = chain_hash(prev_hash.as_deref(), &payload, &signature);

                let res = tx.execute(
                    "INSERT INTO receipts (id, payload, signature, prev_hash, hash, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![id, payload, signature, prev_hash, hash, created_at],
                );
                if let Err(e) = res {
                    return match conflict_for(&e, &id, &hash) {
                        Some(conflict) => Ok(Insert::Conflict(conflict)),
                        None => Err(e.into()),
                    };
                }

                tx.commit()?;
                Ok(Insert::Committed { prev_hash, hash })
            })
            .await
            .map_err(call_err)?;

        match insert {
            Insert::Committed { prev_hash, hash } => {
                debug!(
                    id = %receipt.id,
                    hash = %hash,
                    genesis = prev_hash.is_none(),
                    "appended receipt"
                );
                receipt.prev_hash = prev_hash;
                receipt.hash = hash;
                Ok(())
            }
            Insert::Conflict(e) => {
                error!(id = %receipt.id, error = %e, "receipt append rejected");
                Err(e)
            }
        }
    }

    async fn verify_chain(&self) -> Result<bool, LedgerError> {
        Ok(self.audit_chain().await?.is_intact())
    }
}

/// Checks one row against the running previous hash and returns the recomputed hash.
///
/// The stored `hash` is only compared, never trusted as the next expected link.
fn check_link(
    expected_prev: Option<&str>,
    payload: &[u8],
    signature: &[u8],
    stored_prev: Option<String>,
    stored_hash: String,
) -> Result<String, ChainFault> {
    if stored_prev.as_deref() != expected_prev {
        return Err(ChainFault::LinkMismatch {
            expected: expected_prev.map(str::to_string),
            found: stored_prev,
        });
    }
    let computed = chain_hash(stored_prev.as_deref(), payload, signature);
    if computed != stored_hash {
        return Err(ChainFault::HashMismatch {
            expected: computed,
            found: stored_hash,
        });
    }
    Ok(computed)
}

fn conflict_for(err: &rusqlite::Error, id: &str, hash: &str) -> Option<LedgerError> {
    let rusqlite::Error::SqliteFailure(e, Some(msg)) = err else {
        return None;
    };
    if e.code != rusqlite::ErrorCode::ConstraintViolation {
        return None;
    }
    if msg.contains("receipts.hash") {
        Some(LedgerError::DuplicateHash {
            hash: hash.to_string(),
        })
    } else if msg.contains("receipts.id") {
        Some(LedgerError::DuplicateId { id: id.to_string() })
    } else {
        None
    }
}

fn receipt_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Receipt> {
    Ok(Receipt {
        id: row.get(0)?,
        payload: row.get(1)?,
        signature: row.get(2)?,
        prev_hash: row.get(3)?,
        hash: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn call_err(e: tokio_rusqlite::Error) -> LedgerError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => LedgerError::Db(e),
        other => LedgerError::Other(anyhow::anyhow!(other)),
    }
}
