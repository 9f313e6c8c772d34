//! Core business logic - framework-agnostic SIM inventory operations.
//!
//! Store operations take any `ConnectionTrait` (a connection or an open
//! transaction) unless they need to run their own transaction.

/// Claim-and-activate flow and registry suspension
pub mod allocation;
/// Batch importer
pub mod batch;
/// Reconciliation loop over all pools
pub mod reconcile;
/// Registry entries
pub mod registry;
/// SIM resource store
pub mod sim;
/// Profile vendor entries and permissions
pub mod vendor;
