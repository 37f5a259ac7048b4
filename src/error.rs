//! Error taxonomy shared across the engine.
use thiserror::Error;

/// Failures raised by the transport layer underneath the codec.
///
/// These never terminate the event loop; they are surfaced to the wallet
/// through [`WalletHooks::on_fail`](crate::hooks::WalletHooks::on_fail)
/// and the engine keeps retrying on its polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The bus could not be established when connecting to a server.
    #[error("could not connect to the indexer")]
    ConnectFailed,
    /// A request did not complete within the codec timeout.
    #[error("indexer request timed out")]
    Timeout,
    /// A response arrived but its bytes did not parse.
    #[error("malformed response from the indexer")]
    Decode,
}

/// A typed failure for one indexer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IndexerError {
    /// The requested item is not in the indexer's view. For a confirmed
    /// transaction fetch this drives the mempool fallback; for a
    /// transaction-index fetch it means the tx is unconfirmed.
    #[error("not found by the indexer")]
    NotFound,
    /// The server answered with an application error code (for a
    /// broadcast, a rejection).
    #[error("indexer refused the request (code {0})")]
    Server(u32),
    /// The request never produced a usable answer.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures from [`TxDb::load`](crate::txdb::TxDb::load).
///
/// A failed load leaves the database untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// The blob does not start with a known magic.
    #[error("unrecognized snapshot magic")]
    BadMagic,
    /// The blob ends mid-record.
    #[error("snapshot is truncated")]
    Truncated,
    /// A record type or state byte is not part of the schema.
    #[error("unknown snapshot record")]
    UnknownRecord,
}
