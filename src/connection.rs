//! One live connection: codec, updaters, and the in-flight request set.
use crate::address::PaymentAddress;
use crate::address_updater::AddressUpdater;
use crate::bus::MessageBus;
use crate::codec::{HistoryRow, IndexerCodec};
use crate::error::IndexerError;
use crate::hooks::WalletHooks;
use crate::tx_updater::TxUpdater;
use crate::txdb::TxDb;
use bitcoin::{Transaction, Txid};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The set of outstanding indexer requests. Each request is a future
/// resolving to the typed event its continuation handles; dropping the
/// set (on disconnect) cancels and discards every pending continuation.
pub(crate) type Inflight = FuturesUnordered<BoxFuture<'static, SyncEvent>>;

/// Completion of one indexer request.
pub(crate) enum SyncEvent {
    Height(Result<u64, IndexerError>),
    Tx {
        txid: Txid,
        result: Result<Transaction, IndexerError>,
    },
    MempoolTx {
        txid: Txid,
        result: Result<Transaction, IndexerError>,
    },
    Index {
        txid: Txid,
        result: Result<(u64, u64), IndexerError>,
    },
    Broadcast {
        tx: Transaction,
        result: Result<(), IndexerError>,
    },
    History {
        address: PaymentAddress,
        result: Result<Vec<HistoryRow>, IndexerError>,
    },
}

/// Bundles everything whose lifetime is tied to one server connection.
pub(crate) struct Connection<W> {
    pub(crate) inflight: Inflight,
    tx_updater: TxUpdater<W>,
    address_updater: AddressUpdater,
    hooks: Arc<W>,
}

impl<W: WalletHooks + 'static> Connection<W> {
    pub(crate) fn new(bus: Arc<dyn MessageBus>, db: Arc<Mutex<TxDb>>, hooks: Arc<W>) -> Self {
        let codec = Arc::new(IndexerCodec::new(bus));
        Self {
            inflight: FuturesUnordered::new(),
            tx_updater: TxUpdater::new(db, Arc::clone(&codec), Arc::clone(&hooks)),
            address_updater: AddressUpdater::new(codec),
            hooks,
        }
    }

    /// Initial sweep: chain height, pending fork re-checks, and any
    /// transactions still waiting to be broadcast.
    pub(crate) fn start(&mut self) {
        self.tx_updater.start(&mut self.inflight);
    }

    pub(crate) fn watch_address(&mut self, address: PaymentAddress, poll: Duration) {
        self.address_updater
            .watch(&mut self.inflight, address, poll);
    }

    pub(crate) fn watch_tx(&mut self, txid: Txid) {
        self.tx_updater.watch(&mut self.inflight, txid);
    }

    pub(crate) async fn send(&mut self, tx: Transaction) {
        self.tx_updater.send(&mut self.inflight, tx).await;
    }

    /// Run due periodic work and report how long the loop may sleep.
    pub(crate) fn wakeup(&mut self) -> Duration {
        let next = self.tx_updater.wakeup(&mut self.inflight);
        match self.address_updater.wakeup(&mut self.inflight) {
            Some(addr_next) => next.min(addr_next),
            None => next,
        }
    }

    /// Handle one completed request on the loop task.
    pub(crate) async fn dispatch(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::History { address, result } => match result {
                Ok(rows) => {
                    debug!(%address, rows = rows.len(), "history fetched");
                    for row in rows {
                        self.tx_updater.watch(&mut self.inflight, row.output.txid);
                        if let Some(spend) = row.spend {
                            self.tx_updater.watch(&mut self.inflight, spend.txid);
                        }
                    }
                }
                Err(error) => {
                    warn!(%address, %error, "history fetch failed");
                    self.hooks.on_fail(&error).await;
                }
            },
            other => self.tx_updater.on_event(&mut self.inflight, other).await,
        }
    }
}
