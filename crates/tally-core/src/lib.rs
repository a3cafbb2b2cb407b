//! Core types shared across the tally workspace.
//!
//! Kept free of runtime and storage dependencies so the signer, the ledger and the CLI can
//! all depend on it.

pub mod clock;
pub mod receipt;
pub mod sensitive;
pub mod util;

pub use clock::{Clock, FixedClock, SystemClock};
pub use receipt::Receipt;
pub use sensitive::Sensitive;
