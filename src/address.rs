//! Payment addresses and their mapping to/from output lock scripts.
use bitcoin::hashes::Hash;
use bitcoin::{base58, PubkeyHash, Script, ScriptBuf, ScriptHash};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version byte for pay-to-pubkey-hash addresses.
pub const P2PKH_VERSION: u8 = 0x00;
/// Version byte for pay-to-script-hash addresses.
pub const P2SH_VERSION: u8 = 0x05;

/// A watched payment address: a version byte plus a 20-byte hash.
///
/// Equality and hashing are by the pair, and the canonical string form
/// is Base58Check of the 21 raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaymentAddress {
    version: u8,
    hash: [u8; 20],
}

/// The string passed to [`PaymentAddress::from_str`] was not a valid
/// Base58Check address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid payment address")]
pub struct AddressParseError;

impl PaymentAddress {
    /// Build an address from its raw parts.
    pub fn new(version: u8, hash: [u8; 20]) -> Self {
        Self { version, hash }
    }

    /// The version byte.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// The 20-byte hash.
    pub fn hash_bytes(&self) -> &[u8; 20] {
        &self.hash
    }

    /// The standard lock script paying to this address.
    pub fn script_pubkey(&self) -> ScriptBuf {
        match self.version {
            P2SH_VERSION => ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(self.hash)),
            _ => ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(self.hash)),
        }
    }

    /// Recover the address a lock script pays to, if it is a standard
    /// P2PKH or P2SH script. Anything else yields `None`.
    pub fn extract(script: &Script) -> Option<Self> {
        let bytes = script.as_bytes();
        if script.is_p2pkh() {
            // OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&bytes[3..23]);
            Some(Self::new(P2PKH_VERSION, hash))
        } else if script.is_p2sh() {
            // OP_HASH160 <20> OP_EQUAL
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&bytes[2..22]);
            Some(Self::new(P2SH_VERSION, hash))
        } else {
            None
        }
    }
}

impl fmt::Display for PaymentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut raw = [0u8; 21];
        raw[0] = self.version;
        raw[1..].copy_from_slice(&self.hash);
        f.write_str(&base58::encode_check(&raw))
    }
}

impl FromStr for PaymentAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = base58::decode_check(s).map_err(|_| AddressParseError)?;
        if raw.len() != 21 {
            return Err(AddressParseError);
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&raw[1..]);
        Ok(Self::new(raw[0], hash))
    }
}
