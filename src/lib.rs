//! Strata chunk storage workspace root
//!
//! Re-exports the member crates and hosts the integration tests that
//! exercise them together.

pub use strata_cas as cas;
pub use strata_index as index;
pub use strata_store as store;
