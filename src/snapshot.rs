//! Binary snapshot of the transaction database.
//!
//! A snapshot is a little-endian record stream: a 4-byte magic, the
//! 8-byte last height, then self-delimited records. The only record is
//! a transaction row: type byte `0x42`, the 32-byte hash, the
//! consensus-serialized transaction, a state byte, an 8-byte block
//! height, and a re-check byte. A rival magic from the format this one
//! replaced is recognized and loads as empty (that data is not
//! trusted); anything else is an error.
use crate::error::SnapshotError;
use crate::txdb::{TxDb, TxRow, TxState};
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::{Transaction, Txid};
use std::collections::BTreeMap;

const MAGIC: u32 = 0xfecdb760;
const LEGACY_MAGIC: u32 = 0x3eab61c3;
const RECORD_TX: u8 = 0x42;

impl TxDb {
    /// Write the whole database to an in-memory blob.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&self.last_height.to_le_bytes());
        for (txid, row) in &self.rows {
            out.push(RECORD_TX);
            out.extend_from_slice(&txid.to_byte_array());
            out.extend_from_slice(&encode::serialize(&row.tx));
            out.push(row.state as u8);
            out.extend_from_slice(&row.block_height.to_le_bytes());
            out.push(row.needs_recheck as u8);
        }
        out
    }

    /// Reconstitute the database from a blob produced by
    /// [`serialize`](Self::serialize).
    ///
    /// The blob is parsed into a scratch table first; on any error the
    /// database is left exactly as it was. The stored hash is taken as
    /// authoritative rather than recomputed.
    pub fn load(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        let mut reader = Reader { data, pos: 0 };

        let magic = u32::from_le_bytes(reader.take::<4>()?);
        if magic == LEGACY_MAGIC {
            return Ok(());
        }
        if magic != MAGIC {
            return Err(SnapshotError::BadMagic);
        }

        let last_height = u64::from_le_bytes(reader.take::<8>()?);
        let mut rows = BTreeMap::new();
        while !reader.is_empty() {
            if reader.take::<1>()?[0] != RECORD_TX {
                return Err(SnapshotError::UnknownRecord);
            }
            let txid = Txid::from_byte_array(reader.take::<32>()?);
            let tx: Transaction = reader.transaction()?;
            let state = TxState::from_byte(reader.take::<1>()?[0])
                .ok_or(SnapshotError::UnknownRecord)?;
            let block_height = u64::from_le_bytes(reader.take::<8>()?);
            let needs_recheck = reader.take::<1>()?[0] != 0;
            rows.insert(
                txid,
                TxRow {
                    tx,
                    state,
                    block_height,
                    needs_recheck,
                },
            );
        }

        self.last_height = last_height;
        self.rows = rows;
        Ok(())
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], SnapshotError> {
        let end = self.pos.checked_add(N).ok_or(SnapshotError::Truncated)?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(SnapshotError::Truncated)?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn transaction(&mut self) -> Result<Transaction, SnapshotError> {
        let (tx, consumed) = encode::deserialize_partial(&self.data[self.pos..])
            .map_err(|_| SnapshotError::Truncated)?;
        self.pos += consumed;
        Ok(tx)
    }
}
