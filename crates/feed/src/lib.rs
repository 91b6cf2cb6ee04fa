//! Open price feed collaborators.
//!
//! - Reporter HTTP client for signed price messages
//! - Cached `PriceLedger` with staleness and deviation checks

mod ledger;
mod reporter;

pub use ledger::FeedPriceLedger;
pub use reporter::{ReporterClient, ReporterPayload};
