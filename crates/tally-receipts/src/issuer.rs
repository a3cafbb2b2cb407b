use std::sync::Arc;

use tally_core::{Clock, Receipt};
use tally_signer::Signer;
use thiserror::Error;
use uuid::Uuid;

use crate::store::{Ledger, LedgerError};

#[derive(Debug, Error)]
pub enum IssueError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Signs payloads and commits them to the ledger.
#[derive(Clone)]
pub struct ReceiptIssuer {
    signer: Arc<dyn Signer>,
    ledger: Arc<dyn Ledger>,
}

impl ReceiptIssuer {
    pub fn new(signer: Arc<dyn Signer>, ledger: Arc<dyn Ledger>) -> Self {
        Self { signer, ledger }
    }

    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    /// Returns the committed receipt, with `prev_hash` and `hash` filled in by the ledger.
    pub async fn issue(
        &self,
        payload: Vec<u8>,
        id: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Result<Receipt, IssueError> {
        let signature = self.signer.sign(&payload).to_vec();
        let mut receipt = Receipt::pending(id, payload, signature, created_at);
        self.ledger.append(&mut receipt).await?;
        Ok(receipt)
    }

    /// Like [`issue`](Self::issue) with a fresh UUIDv4 id and the clock's current time.
    pub async fn issue_now(
        &self,
        payload: Vec<u8>,
        clock: &dyn Clock,
    ) -> Result<Receipt, IssueError> {
        let id = Uuid::new_v4().to_string();
        self.issue(payload, id, clock.now_rfc3339()).await
    }
}

/// Checks that a receipt's signature was produced by `signer` over its payload.
pub fn verify_receipt_signature(signer: &dyn Signer, receipt: &Receipt) -> bool {
    signer.verify(&receipt.payload, &receipt.signature)
}
