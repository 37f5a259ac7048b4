//! Drives the transaction database to convergence with the indexer.
//!
//! Every server query is pushed onto the connection's in-flight set as
//! a future resolving to a [`SyncEvent`]; the continuations run in
//! [`on_event`](TxUpdater::on_event) on the loop task, so the database
//! is only ever mutated there.
use crate::codec::IndexerCodec;
use crate::connection::{Inflight, SyncEvent};
use crate::engine::BLOCK_POLL;
use crate::hooks::WalletHooks;
use crate::txdb::{TxDb, TxState};
use bitcoin::{Transaction, Txid};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub(crate) struct TxUpdater<W> {
    db: Arc<Mutex<TxDb>>,
    codec: Arc<IndexerCodec>,
    hooks: Arc<W>,
    // Back-pressure: only one fork-resolution sweep outstanding.
    queued_get_indices: usize,
    last_block_poll: Instant,
}

impl<W: WalletHooks + 'static> TxUpdater<W> {
    pub(crate) fn new(db: Arc<Mutex<TxDb>>, codec: Arc<IndexerCodec>, hooks: Arc<W>) -> Self {
        Self {
            db,
            codec,
            hooks,
            queued_get_indices: 0,
            last_block_poll: Instant::now(),
        }
    }

    pub(crate) fn start(&mut self, inflight: &mut Inflight) {
        // Check for new blocks:
        self.get_height(inflight);

        // Resume any fork re-checks left over from a loaded snapshot:
        self.queue_get_indices(inflight);

        // Transmit all unsent transactions:
        let unsent = self.db.lock().unsent_txs();
        for tx in unsent {
            self.send_tx(inflight, tx);
        }
    }

    /// Make sure `txid` ends up in the database.
    pub(crate) fn watch(&mut self, inflight: &mut Inflight, txid: Txid) {
        if !self.db.lock().has_tx(&txid) {
            self.get_tx(inflight, txid);
        }
    }

    /// Insert a locally authored transaction and broadcast it.
    pub(crate) async fn send(&mut self, inflight: &mut Inflight, tx: Transaction) {
        let (_, fresh) = self.db.lock().send(&tx);
        if fresh {
            self.hooks.on_add(&tx).await;
        }
        self.send_tx(inflight, tx);
    }

    /// Run the block tick if due; returns time until the next one.
    pub(crate) fn wakeup(&mut self, inflight: &mut Inflight) -> Duration {
        let elapsed = self.last_block_poll.elapsed();
        if elapsed >= BLOCK_POLL {
            self.get_height(inflight);
            self.last_block_poll = Instant::now();
            BLOCK_POLL
        } else {
            BLOCK_POLL - elapsed
        }
    }

    pub(crate) async fn on_event(&mut self, inflight: &mut Inflight, event: SyncEvent) {
        match event {
            SyncEvent::Height(Ok(height)) => {
                let changed = self.db.lock().at_height(height);
                if changed {
                    self.hooks.on_height(height).await;

                    // Anything unconfirmed may have made it into the
                    // new block; anything flagged needs re-proving.
                    let unconfirmed = self.db.lock().unconfirmed_txids();
                    for txid in unconfirmed {
                        self.get_index(inflight, txid);
                    }
                    self.queue_get_indices(inflight);
                }
            }
            SyncEvent::Height(Err(error)) => {
                warn!(%error, "height fetch failed");
                self.hooks.on_fail(&error).await;
            }
            SyncEvent::Tx { txid, result } => match result {
                Ok(tx) => self.got_tx(inflight, txid, tx).await,
                Err(_) => {
                    // Not in the confirmed chain; it may be in the mempool.
                    debug!(%txid, "falling back to the mempool");
                    self.get_tx_mem(inflight, txid);
                }
            },
            SyncEvent::MempoolTx { txid, result } => match result {
                Ok(tx) => self.got_tx(inflight, txid, tx).await,
                Err(error) => {
                    warn!(%txid, %error, "mempool fetch failed");
                    self.hooks.on_fail(&error).await;
                }
            },
            SyncEvent::Index { txid, result } => {
                {
                    let mut db = self.db.lock();
                    match result {
                        Ok((height, _index)) => db.confirmed(txid, height),
                        // Failure means the transaction is unconfirmed:
                        Err(_) => db.unconfirmed(txid),
                    }
                }
                self.queued_get_indices = self.queued_get_indices.saturating_sub(1);
                self.queue_get_indices(inflight);
            }
            SyncEvent::Broadcast { tx, result } => {
                let txid = tx.compute_txid();
                match &result {
                    Ok(()) => {
                        // The network has the transaction now:
                        self.db.lock().unconfirmed(txid);
                    }
                    Err(error) => {
                        warn!(%txid, %error, "broadcast rejected");
                        self.db.lock().forget(txid);
                    }
                }
                self.hooks.on_send(&result, &tx).await;
            }
            // History completions are routed to the address updater's
            // continuation before reaching this point.
            SyncEvent::History { .. } => {}
        }
    }

    async fn got_tx(&mut self, inflight: &mut Inflight, txid: Txid, tx: Transaction) {
        debug_assert_eq!(txid, tx.compute_txid(), "indexer answered with a different tx");
        let (_, fresh) = self.db.lock().insert(&tx, TxState::Unconfirmed);
        if fresh {
            self.hooks.on_add(&tx).await;
        }
        self.get_index(inflight, txid);
    }

    fn queue_get_indices(&mut self, inflight: &mut Inflight) {
        if self.queued_get_indices > 0 {
            return;
        }
        let forked = self.db.lock().forked_txids();
        for txid in forked {
            self.get_index(inflight, txid);
        }
    }

    // - server queries --------------------

    fn get_height(&self, inflight: &mut Inflight) {
        let codec = Arc::clone(&self.codec);
        inflight.push(async move { SyncEvent::Height(codec.fetch_last_height().await) }.boxed());
    }

    fn get_tx(&self, inflight: &mut Inflight, txid: Txid) {
        let codec = Arc::clone(&self.codec);
        inflight.push(
            async move {
                SyncEvent::Tx {
                    txid,
                    result: codec.fetch_transaction(txid).await,
                }
            }
            .boxed(),
        );
    }

    fn get_tx_mem(&self, inflight: &mut Inflight, txid: Txid) {
        let codec = Arc::clone(&self.codec);
        inflight.push(
            async move {
                SyncEvent::MempoolTx {
                    txid,
                    result: codec.fetch_unconfirmed_transaction(txid).await,
                }
            }
            .boxed(),
        );
    }

    fn get_index(&mut self, inflight: &mut Inflight, txid: Txid) {
        self.queued_get_indices += 1;
        let codec = Arc::clone(&self.codec);
        inflight.push(
            async move {
                SyncEvent::Index {
                    txid,
                    result: codec.fetch_transaction_index(txid).await,
                }
            }
            .boxed(),
        );
    }

    fn send_tx(&self, inflight: &mut Inflight, tx: Transaction) {
        let codec = Arc::clone(&self.codec);
        inflight.push(
            async move {
                let result = codec.broadcast_transaction(&tx).await;
                SyncEvent::Broadcast { tx, result }
            }
            .boxed(),
        );
    }
}
