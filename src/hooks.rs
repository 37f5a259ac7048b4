//! Wallet glue: notifications delivered while the engine syncs.
use crate::error::IndexerError;
use async_trait::async_trait;
use bitcoin::Transaction;

/// Callbacks the engine fires as the database changes.
///
/// All methods default to no-ops, so a wallet overrides only what it
/// cares about. Every callback runs on the engine's loop task; forward
/// to another thread yourself if you need to.
#[async_trait]
pub trait WalletHooks: Send + Sync {
    /// A transaction was inserted into the database. Fires at most once
    /// per hash over the life of a database instance.
    async fn on_add(&self, _tx: &Transaction) {}

    /// The chain tip moved. Fires only when the height actually changes.
    async fn on_height(&self, _height: u64) {}

    /// A broadcast finished, one way or the other. On `Err` the
    /// rejected transaction has already been removed from the database.
    async fn on_send(&self, _outcome: &Result<(), IndexerError>, _tx: &Transaction) {}

    /// An indexer request failed unexpectedly. Informational; the
    /// engine keeps retrying on its own cadence.
    async fn on_fail(&self, _error: &IndexerError) {}
}
