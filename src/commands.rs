//! Byte encoding of the controller's inbound command queue.
//!
//! Public API methods that mutate state serialize a command into the
//! queue instead of touching engine state; the loop decodes and applies
//! them in FIFO order. Layout: a code byte followed by a fixed-width
//! little-endian payload (the transaction and URL payloads run to the
//! end of the buffer).
use crate::address::PaymentAddress;
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::{Transaction, Txid};
use std::time::Duration;

const CMD_QUIT: u8 = 0;
const CMD_DISCONNECT: u8 = 1;
const CMD_CONNECT: u8 = 2;
const CMD_WATCH_TX: u8 = 3;
const CMD_WATCH_ADDR: u8 = 4;
const CMD_SEND: u8 = 5;
const CMD_PRIORITIZE: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Quit,
    Disconnect,
    Connect(String),
    WatchTx(Txid),
    WatchAddr {
        address: PaymentAddress,
        poll: Duration,
    },
    Send(Transaction),
    Prioritize(Option<PaymentAddress>),
}

impl Command {
    pub(crate) fn encode(&self) -> Vec<u8> {
        match self {
            Command::Quit => vec![CMD_QUIT],
            Command::Disconnect => vec![CMD_DISCONNECT],
            Command::Connect(url) => {
                let mut out = vec![CMD_CONNECT];
                out.extend_from_slice(url.as_bytes());
                out
            }
            Command::WatchTx(txid) => {
                let mut out = vec![CMD_WATCH_TX];
                out.extend_from_slice(&txid.to_byte_array());
                out
            }
            Command::WatchAddr { address, poll } => {
                let mut out = vec![CMD_WATCH_ADDR, address.version()];
                out.extend_from_slice(address.hash_bytes());
                let poll_ms = poll.as_millis().min(u128::from(u32::MAX)) as u32;
                out.extend_from_slice(&poll_ms.to_le_bytes());
                out
            }
            Command::Send(tx) => {
                let mut out = vec![CMD_SEND];
                out.extend_from_slice(&encode::serialize(tx));
                out
            }
            Command::Prioritize(address) => {
                let mut out = vec![CMD_PRIORITIZE];
                match address {
                    Some(address) => {
                        out.push(1);
                        out.push(address.version());
                        out.extend_from_slice(address.hash_bytes());
                    }
                    None => out.push(0),
                }
                out
            }
        }
    }

    pub(crate) fn decode(data: &[u8]) -> Option<Command> {
        let (&code, rest) = data.split_first()?;
        match code {
            CMD_QUIT if rest.is_empty() => Some(Command::Quit),
            CMD_DISCONNECT if rest.is_empty() => Some(Command::Disconnect),
            CMD_CONNECT => Some(Command::Connect(String::from_utf8(rest.to_vec()).ok()?)),
            CMD_WATCH_TX => {
                let bytes: [u8; 32] = rest.try_into().ok()?;
                Some(Command::WatchTx(Txid::from_byte_array(bytes)))
            }
            CMD_WATCH_ADDR if rest.len() == 25 => {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&rest[1..21]);
                let poll_ms = u32::from_le_bytes(rest[21..].try_into().ok()?);
                Some(Command::WatchAddr {
                    address: PaymentAddress::new(rest[0], hash),
                    poll: Duration::from_millis(u64::from(poll_ms)),
                })
            }
            CMD_SEND => Some(Command::Send(encode::deserialize(rest).ok()?)),
            CMD_PRIORITIZE => match rest {
                [0] => Some(Command::Prioritize(None)),
                [1, version, hash @ ..] if hash.len() == 20 => {
                    let mut bytes = [0u8; 20];
                    bytes.copy_from_slice(hash);
                    Some(Command::Prioritize(Some(PaymentAddress::new(
                        *version, bytes,
                    ))))
                }
                _ => None,
            },
            _ => None,
        }
    }
}
