//! The local transaction database.
//!
//! Holds every transaction that concerns the watched addresses, tracks
//! each one through a three-state lifecycle, derives unspent outputs,
//! and flags confirmed rows whose block inclusion has become suspect
//! after a possible chain fork.
//!
//! The indexer only reports a `(height, index)` pair per confirmed
//! transaction, never a block hash, so a reorganization can be
//! suspected but not proven. Whenever an event would move a confirmed
//! row's height, the rows at the next-lower populated height are marked
//! for re-checking and the sync engine re-queries them.
use crate::address::PaymentAddress;
use bitcoin::{Amount, OutPoint, Transaction, Txid};
use std::collections::BTreeMap;
use tracing::debug;

/// Lifecycle state of a stored transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxState {
    /// Authored locally and not yet broadcast to the network.
    Unsent = 0,
    /// Seen by the network, but not in a block.
    Unconfirmed = 1,
    /// In a block.
    Confirmed = 2,
}

impl TxState {
    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Unsent),
            1 => Some(Self::Unconfirmed),
            2 => Some(Self::Confirmed),
            _ => None,
        }
    }
}

/// An unspent output: no transaction in the database consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utxo {
    /// The output's location.
    pub outpoint: OutPoint,
    /// The output's value.
    pub value: Amount,
}

pub(crate) struct TxRow {
    pub(crate) tx: Transaction,
    pub(crate) state: TxState,
    pub(crate) block_height: u64,
    pub(crate) needs_recheck: bool,
}

/// The transaction cache. See the [module docs](self) for the fork
/// policy; the snapshot format lives in [`serialize`](TxDb::serialize)
/// and [`load`](TxDb::load).
///
/// Read-only queries may run from any thread (the engine guards the
/// database with a single mutex); every mutating operation is driven
/// from the engine's event loop.
#[derive(Default)]
pub struct TxDb {
    pub(crate) last_height: u64,
    pub(crate) rows: BTreeMap<Txid, TxRow>,
}

impl TxDb {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// The highest block the database has seen.
    pub fn last_height(&self) -> u64 {
        self.last_height
    }

    /// Whether the database contains a transaction.
    pub fn has_tx(&self, txid: &Txid) -> bool {
        self.rows.contains_key(txid)
    }

    /// Look up a transaction.
    pub fn get_tx(&self, txid: &Txid) -> Option<Transaction> {
        self.rows.get(txid).map(|row| row.tx.clone())
    }

    /// A transaction's block height, or 0 for any state other than
    /// [`TxState::Confirmed`] (including absence).
    pub fn get_tx_height(&self, txid: &Txid) -> u64 {
        match self.rows.get(txid) {
            Some(row) if row.state == TxState::Confirmed => row.block_height,
            _ => 0,
        }
    }

    /// Number of rows in [`TxState::Unconfirmed`].
    pub fn count_unconfirmed(&self) -> usize {
        self.rows
            .values()
            .filter(|row| row.state == TxState::Unconfirmed)
            .count()
    }

    /// Unspent outputs of confirmed transactions, optionally filtered
    /// to those paying `address`.
    ///
    /// An output is unspent iff no transaction in the database (of any
    /// state) has an input referencing it.
    pub fn get_utxos(&self, address: Option<&PaymentAddress>) -> Vec<Utxo> {
        let mut out = Vec::new();
        for (txid, row) in &self.rows {
            if row.state != TxState::Confirmed {
                continue;
            }
            for (index, output) in row.tx.output.iter().enumerate() {
                let outpoint = OutPoint::new(*txid, index as u32);
                if let Some(address) = address {
                    if PaymentAddress::extract(&output.script_pubkey) != Some(*address) {
                        continue;
                    }
                }
                if self.is_unspent(outpoint) {
                    out.push(Utxo {
                        outpoint,
                        value: output.value,
                    });
                }
            }
        }
        out
    }

    /// Insert a locally authored transaction as [`TxState::Unsent`].
    ///
    /// Returns the hash and whether the row is new. The caller fires
    /// `on_add` on a fresh insert.
    pub fn send(&mut self, tx: &Transaction) -> (Txid, bool) {
        self.insert(tx, TxState::Unsent)
    }

    /// Insert a transaction, idempotent by hash.
    ///
    /// An unknown hash is stored with the given state and height 0; a
    /// known hash is left exactly as it was; insertion never changes
    /// an existing row's state. Returns the hash and whether the row
    /// is new.
    pub fn insert(&mut self, tx: &Transaction, state: TxState) -> (Txid, bool) {
        let txid = tx.compute_txid();
        if self.rows.contains_key(&txid) {
            return (txid, false);
        }
        debug!(%txid, ?state, "inserting transaction");
        self.rows.insert(
            txid,
            TxRow {
                tx: tx.clone(),
                state,
                block_height: 0,
                needs_recheck: false,
            },
        );
        (txid, true)
    }

    /// Mark a transaction as confirmed at `block_height`.
    ///
    /// The hash must already be present (a missing hash is a caller
    /// bug, asserted in debug builds). A row that was confirmed at a
    /// *different* height means the chain has forked under us, so the
    /// rows just below the old height are flagged for re-checking.
    pub fn confirmed(&mut self, txid: Txid, block_height: u64) {
        let Some(row) = self.rows.get(&txid) else {
            debug_assert!(false, "confirmed() on unknown hash {txid}");
            return;
        };
        if row.state == TxState::Confirmed && row.block_height != block_height {
            let old_height = row.block_height;
            self.check_fork(old_height);
        }
        if let Some(row) = self.rows.get_mut(&txid) {
            debug!(%txid, block_height, "transaction confirmed");
            row.state = TxState::Confirmed;
            row.block_height = block_height;
            row.needs_recheck = false;
        }
    }

    /// Mark a transaction as not being in any block.
    ///
    /// If the row was confirmed, its disappearance from the chain is a
    /// fork signal, so the rows below its old height are flagged. The
    /// row itself drops back to [`TxState::Unconfirmed`] until a later
    /// index query re-proves it.
    pub fn unconfirmed(&mut self, txid: Txid) {
        let Some(row) = self.rows.get(&txid) else {
            return;
        };
        if row.state == TxState::Confirmed {
            let old_height = row.block_height;
            self.check_fork(old_height);
        }
        if let Some(row) = self.rows.get_mut(&txid) {
            debug!(%txid, "transaction unconfirmed");
            row.state = TxState::Unconfirmed;
            row.block_height = 0;
            row.needs_recheck = true;
        }
    }

    /// Remove a transaction unconditionally (the network rejected a
    /// broadcast).
    pub fn forget(&mut self, txid: Txid) {
        debug!(%txid, "forgetting transaction");
        self.rows.remove(&txid);
    }

    /// Record the chain tip reported by the indexer.
    ///
    /// Returns whether the height actually changed; the caller fires
    /// `on_height` only on a change. Any change is treated as a fork
    /// signal for the rows just below the new tip.
    pub fn at_height(&mut self, height: u64) -> bool {
        if height == self.last_height {
            return false;
        }
        debug!(height, "chain tip moved");
        self.last_height = height;
        self.check_fork(height);
        true
    }

    /// Transactions still waiting to be broadcast.
    pub fn unsent_txs(&self) -> Vec<Transaction> {
        self.rows
            .values()
            .filter(|row| row.state == TxState::Unsent)
            .map(|row| row.tx.clone())
            .collect()
    }

    /// Hashes of rows in [`TxState::Unconfirmed`].
    pub fn unconfirmed_txids(&self) -> Vec<Txid> {
        self.rows
            .iter()
            .filter(|(_, row)| row.state == TxState::Unconfirmed)
            .map(|(txid, _)| *txid)
            .collect()
    }

    /// Hashes of confirmed rows whose block inclusion is in question.
    pub fn forked_txids(&self) -> Vec<Txid> {
        self.rows
            .iter()
            .filter(|(_, row)| row.state == TxState::Confirmed && row.needs_recheck)
            .map(|(txid, _)| *txid)
            .collect()
    }

    /// Flag the confirmed rows at the next-lower populated block height
    /// relative to `height`.
    fn check_fork(&mut self, height: u64) {
        let prev_height = self
            .rows
            .values()
            .filter(|row| row.state == TxState::Confirmed && row.block_height < height)
            .map(|row| row.block_height)
            .max()
            .unwrap_or(0);
        if prev_height == 0 {
            return;
        }
        for (txid, row) in &mut self.rows {
            if row.state == TxState::Confirmed && row.block_height == prev_height {
                debug!(%txid, prev_height, "flagging row for fork re-check");
                row.needs_recheck = true;
            }
        }
    }

    fn is_unspent(&self, outpoint: OutPoint) -> bool {
        !self.rows.values().any(|row| {
            row.tx
                .input
                .iter()
                .any(|input| input.previous_output == outpoint)
        })
    }
}
