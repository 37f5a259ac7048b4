//! Typed adapter for the six indexer operations.
//!
//! Stateless translation between Rust types and the wire bodies carried
//! by the [`MessageBus`]. Every response starts with a little-endian
//! u32 status: 0 is success, 1 means the requested item is not in the
//! indexer's view, anything else is a server error code. All integers
//! on the wire are little-endian.
use crate::address::PaymentAddress;
use crate::bus::MessageBus;
use crate::error::{IndexerError, TransportError};
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::{Amount, OutPoint, Transaction, Txid};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Deadline applied to every request unless overridden with
/// [`IndexerCodec::with_timeout`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const STATUS_OK: u32 = 0;
const STATUS_NOT_FOUND: u32 = 1;

/// Bytes of one history row on the wire.
const HISTORY_ROW_LEN: usize = 96;

/// One row of an address's history as reported by the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRow {
    /// The output that paid the address.
    pub output: OutPoint,
    /// Block height of the funding transaction.
    pub output_height: u64,
    /// Value paid, in satoshis.
    pub value: Amount,
    /// The input that consumed the output, if any has.
    pub spend: Option<OutPoint>,
    /// Block height of the spending transaction (0 when unspent).
    pub spend_height: u64,
}

/// The request/response codec for one indexer connection.
///
/// Holds no state beyond the bus handle and the per-request deadline;
/// it never caches.
pub struct IndexerCodec {
    bus: Arc<dyn MessageBus>,
    timeout: Duration,
}

impl IndexerCodec {
    /// Wrap a live bus.
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Current chain height.
    pub async fn fetch_last_height(&self) -> Result<u64, IndexerError> {
        let body = self.call("blockchain.fetch_last_height", Vec::new()).await?;
        Ok(u64::from_le_bytes(exact::<8>(&body)?))
    }

    /// Full history of an address from `from_height` on.
    ///
    /// Contractually the engine always passes 0; indexers are not
    /// uniformly incremental and may ignore the field anyway.
    pub async fn fetch_history(
        &self,
        address: &PaymentAddress,
        from_height: u64,
    ) -> Result<Vec<HistoryRow>, IndexerError> {
        let mut req = Vec::with_capacity(25);
        req.push(address.version());
        req.extend_from_slice(address.hash_bytes());
        req.extend_from_slice(&(from_height.min(u64::from(u32::MAX)) as u32).to_le_bytes());

        let body = self.call("address.fetch_history", req).await?;
        if body.len() % HISTORY_ROW_LEN != 0 {
            return Err(TransportError::Decode.into());
        }
        Ok(body
            .chunks_exact(HISTORY_ROW_LEN)
            .map(parse_history_row)
            .collect())
    }

    /// A transaction from the confirmed chain.
    pub async fn fetch_transaction(&self, txid: Txid) -> Result<Transaction, IndexerError> {
        let body = self
            .call("blockchain.fetch_transaction", txid.to_byte_array().to_vec())
            .await?;
        encode::deserialize(&body).map_err(|_| TransportError::Decode.into())
    }

    /// A transaction from the mempool.
    pub async fn fetch_unconfirmed_transaction(
        &self,
        txid: Txid,
    ) -> Result<Transaction, IndexerError> {
        let body = self
            .call(
                "transaction_pool.fetch_transaction",
                txid.to_byte_array().to_vec(),
            )
            .await?;
        encode::deserialize(&body).map_err(|_| TransportError::Decode.into())
    }

    /// A confirmed transaction's `(block_height, index)` placement.
    /// [`IndexerError::NotFound`] means the transaction is unconfirmed.
    pub async fn fetch_transaction_index(&self, txid: Txid) -> Result<(u64, u64), IndexerError> {
        let body = self
            .call(
                "blockchain.fetch_transaction_index",
                txid.to_byte_array().to_vec(),
            )
            .await?;
        let raw = exact::<16>(&body)?;
        let height = u64::from_le_bytes(raw[..8].try_into().expect("8 bytes"));
        let index = u64::from_le_bytes(raw[8..].try_into().expect("8 bytes"));
        Ok((height, index))
    }

    /// Hand a locally authored transaction to the network.
    pub async fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), IndexerError> {
        self.call("protocol.broadcast_transaction", encode::serialize(tx))
            .await?;
        Ok(())
    }

    async fn call(&self, method: &'static str, body: Vec<u8>) -> Result<Vec<u8>, IndexerError> {
        debug!(method, "indexer request");
        let reply = tokio::time::timeout(self.timeout, self.bus.request(method, body))
            .await
            .map_err(|_| TransportError::Timeout)??;

        if reply.len() < 4 {
            return Err(TransportError::Decode.into());
        }
        let status = u32::from_le_bytes(reply[..4].try_into().expect("4 bytes"));
        match status {
            STATUS_OK => Ok(reply[4..].to_vec()),
            STATUS_NOT_FOUND => Err(IndexerError::NotFound),
            code => Err(IndexerError::Server(code)),
        }
    }
}

fn exact<const N: usize>(body: &[u8]) -> Result<[u8; N], IndexerError> {
    body.try_into()
        .map_err(|_| TransportError::Decode.into())
}

fn parse_history_row(raw: &[u8]) -> HistoryRow {
    let txid_at = |offset: usize| {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw[offset..offset + 32]);
        Txid::from_byte_array(bytes)
    };
    let u32_at = |offset: usize| {
        u32::from_le_bytes(raw[offset..offset + 4].try_into().expect("4 bytes"))
    };
    let u64_at = |offset: usize| {
        u64::from_le_bytes(raw[offset..offset + 8].try_into().expect("8 bytes"))
    };

    let spend_txid = txid_at(52);
    let spend = if spend_txid == Txid::all_zeros() {
        None
    } else {
        Some(OutPoint::new(spend_txid, u32_at(84)))
    };
    HistoryRow {
        output: OutPoint::new(txid_at(0), u32_at(32)),
        output_height: u64_at(36),
        value: Amount::from_sat(u64_at(44)),
        spend,
        spend_height: u64_at(88),
    }
}
