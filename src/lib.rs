#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! atalaya: a chain-watcher engine for wallets.
//!
//! ## What you implement
//! - [`Connector`] / [`MessageBus`]: dial the indexer and carry its
//!   correlated request/response traffic.
//! - [`WalletHooks`]: receive add/height/send/fail notifications.
//!
//! ## What the engine does
//! - Maintains a local [`TxDb`] of every transaction touching your
//!   watched addresses, with a three-state lifecycle and UTXO queries.
//! - Polls each watched address on its own interval, pulls referenced
//!   transactions and their block placement, and suspects chain forks
//!   when confirmed heights move.
//! - Broadcasts locally authored transactions, retrying unsent ones on
//!   every fresh connection.
//! - Snapshots the database to a self-delimited blob you can persist
//!   wherever the wallet keeps its files.
//!
//! ## Minimal usage
//! ```rust,no_run
//! use atalaya::prelude::*;
//! # use std::sync::Arc;
//! # struct MyBus;
//! # #[async_trait::async_trait] impl MessageBus for MyBus {
//! #     async fn request(&self, _m: &str, _b: Vec<u8>) -> Result<Vec<u8>, atalaya::error::TransportError> { unimplemented!() }
//! # }
//! # struct MyConnector;
//! # #[async_trait::async_trait] impl Connector for MyConnector {
//! #     async fn connect(&self, _u: &str) -> Result<Arc<dyn MessageBus>, atalaya::error::TransportError> { Ok(Arc::new(MyBus)) }
//! # }
//! # struct MyWallet;
//! # #[async_trait::async_trait] impl WalletHooks for MyWallet {}
//! # async fn demo() -> anyhow::Result<()> {
//! let watcher = Atalaya::new(MyConnector, MyWallet);
//! let address: PaymentAddress = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".parse()?;
//! watcher.watch_address(address, atalaya::engine::DEFAULT_ADDRESS_POLL);
//! watcher.connect("tcp://indexer.example.com:9091");
//! watcher.run().await?; // blocks until watcher.stop()
//! # Ok(()) }
//! ```

/// Payment addresses and their mapping to/from lock scripts.
pub mod address;

/// Traits for the message bus carrying indexer traffic.
pub mod bus;

/// Typed requests to the remote indexer.
pub mod codec;

/// The controller: public API and the event loop.
pub mod engine;

/// Error taxonomy.
pub mod error;

/// Wallet callbacks: notifications delivered while the engine syncs.
pub mod hooks;

/// The local transaction database.
pub mod txdb;

mod address_updater;
mod commands;
mod connection;
mod snapshot;
mod tx_updater;

pub use address::PaymentAddress;
pub use bus::{Connector, MessageBus};
pub use engine::Atalaya;
pub use hooks::WalletHooks;
pub use txdb::TxDb;

/// Common re-exports for end users (engine + traits)
pub mod prelude {
    pub use crate::{Atalaya, Connector, MessageBus, PaymentAddress, TxDb, WalletHooks};
}
