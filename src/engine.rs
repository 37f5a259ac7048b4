//! The controller: public command surface, connection lifecycle, and
//! the event loop that multiplexes commands, indexer responses, and
//! the updaters' polling cadence.
use crate::address::PaymentAddress;
use crate::bus::Connector;
use crate::commands::Command;
use crate::connection::{Connection, SyncEvent};
use crate::error::SnapshotError;
use crate::hooks::WalletHooks;
use crate::txdb::{TxDb, Utxo};
use anyhow::Context;
use bitcoin::{Transaction, Txid};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Cadence of the chain-tip poll inside the sync engine.
pub const BLOCK_POLL: Duration = Duration::from_secs(30);
/// Poll interval to use with [`Atalaya::watch_address`] when the caller
/// has no better answer.
pub const DEFAULT_ADDRESS_POLL: Duration = Duration::from_millis(10_000);
/// Poll interval of the single prioritized address.
pub const PRIORITY_ADDRESS_POLL: Duration = Duration::from_millis(1_000);
/// Fastest admissible address poll; shorter intervals are clamped.
pub const MIN_ADDRESS_POLL: Duration = Duration::from_millis(500);

/// How long the loop sleeps between command checks while disconnected.
const IDLE_SLEEP: Duration = Duration::from_secs(60);

/// The chain watcher. `C` dials the indexer, `W` receives
/// notifications.
///
/// Construct one, register addresses, call [`connect`](Self::connect),
/// and give the engine a task by awaiting [`run`](Self::run). Mutating
/// calls are serialized into an inbound command queue consumed by the
/// loop, so they are cheap and safe from any thread; read-only queries
/// take a short internal lock on the database.
pub struct Atalaya<C, W> {
    db: Arc<Mutex<TxDb>>,
    hooks: Arc<W>,
    connector: C,
    cmd_tx: mpsc::UnboundedSender<Vec<u8>>,
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

enum Stimulus {
    Command(Option<Vec<u8>>),
    Event(SyncEvent),
    Tick,
}

impl<C, W> Atalaya<C, W>
where
    C: Connector,
    W: WalletHooks + 'static,
{
    /// Create a watcher with an empty database.
    pub fn new(connector: C, hooks: W) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            db: Arc::new(Mutex::new(TxDb::new())),
            hooks: Arc::new(hooks),
            connector,
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
        }
    }

    // - commands --------------------

    /// Connect to the indexer at `server`, tearing down any existing
    /// connection first. Failure is reported through `on_fail` and
    /// leaves the watcher disconnected; a later call retries.
    pub fn connect(&self, server: &str) {
        self.post(Command::Connect(server.to_owned()));
    }

    /// Tear down the current connection, discarding its in-flight
    /// requests.
    pub fn disconnect(&self) {
        self.post(Command::Disconnect);
    }

    /// Poll `address` for history every `poll` (clamped to at least
    /// [`MIN_ADDRESS_POLL`]; pass [`DEFAULT_ADDRESS_POLL`] when in
    /// doubt). Addresses registered while disconnected are replayed
    /// into the next successful connection.
    pub fn watch_address(&self, address: PaymentAddress, poll: Duration) {
        self.post(Command::WatchAddr { address, poll });
    }

    /// Make `address` the single distinguished address polled at
    /// [`PRIORITY_ADDRESS_POLL`]; `None` clears it, reverting the
    /// previous priority to its configured interval.
    pub fn prioritize_address(&self, address: Option<PaymentAddress>) {
        self.post(Command::Prioritize(address));
    }

    /// Fetch `txid` into the database if the current connection does
    /// not know it yet.
    pub fn watch_tx(&self, txid: Txid) {
        self.post(Command::WatchTx(txid));
    }

    /// Queue a locally authored transaction for broadcast. While
    /// disconnected the transaction is stored unsent and transmitted on
    /// the next connect; the outcome arrives through `on_send`.
    pub fn send(&self, tx: &Transaction) {
        self.post(Command::Send(tx.clone()));
    }

    /// Make [`run`](Self::run) return.
    pub fn stop(&self) {
        self.post(Command::Quit);
    }

    // - queries (any thread) --------------------

    /// Look up a transaction.
    pub fn find_tx(&self, txid: &Txid) -> Option<Transaction> {
        self.db.lock().get_tx(txid)
    }

    /// `None` when the transaction is unknown; otherwise its block
    /// height (0 while not confirmed).
    pub fn get_tx_height(&self, txid: &Txid) -> Option<u64> {
        let db = self.db.lock();
        db.has_tx(txid).then(|| db.get_tx_height(txid))
    }

    /// Unspent confirmed outputs, optionally filtered by address.
    pub fn get_utxos(&self, address: Option<&PaymentAddress>) -> Vec<Utxo> {
        self.db.lock().get_utxos(address)
    }

    /// The highest block the database has seen.
    pub fn get_last_block_height(&self) -> u64 {
        self.db.lock().last_height()
    }

    /// Number of unconfirmed transactions in the database.
    pub fn count_unconfirmed(&self) -> usize {
        self.db.lock().count_unconfirmed()
    }

    /// Snapshot the database to an in-memory blob.
    pub fn serialize(&self) -> Vec<u8> {
        self.db.lock().serialize()
    }

    /// Reconstitute the database from a snapshot blob. On error the
    /// database is untouched.
    pub fn load(&self, data: &[u8]) -> Result<(), SnapshotError> {
        self.db.lock().load(data)
    }

    // - the loop --------------------

    /// Run the event loop until [`stop`](Self::stop). All database
    /// mutation and every hook invocation happens on this task.
    ///
    /// # Errors
    ///
    /// Only if called a second time; nothing that happens while running
    /// makes the loop exit with an error.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut rx = self
            .cmd_rx
            .lock()
            .take()
            .context("the watcher loop is already running")?;

        let mut conn: Option<Connection<W>> = None;
        // The configured address book, replayed into every new
        // connection:
        let mut addresses: HashMap<PaymentAddress, Duration> = HashMap::new();
        let mut priority: Option<PaymentAddress> = None;

        loop {
            let sleep_for = match conn.as_mut() {
                Some(c) => c.wakeup(),
                None => IDLE_SLEEP,
            };

            let stimulus = match conn.as_mut() {
                Some(c) => tokio::select! {
                    cmd = rx.recv() => Stimulus::Command(cmd),
                    Some(event) = c.inflight.next() => Stimulus::Event(event),
                    _ = tokio::time::sleep(sleep_for) => Stimulus::Tick,
                },
                None => tokio::select! {
                    cmd = rx.recv() => Stimulus::Command(cmd),
                    _ = tokio::time::sleep(sleep_for) => Stimulus::Tick,
                },
            };

            match stimulus {
                Stimulus::Command(None) => break,
                Stimulus::Command(Some(bytes)) => {
                    let Some(command) = Command::decode(&bytes) else {
                        debug_assert!(false, "undecodable command in the queue");
                        continue;
                    };
                    let flow = self
                        .apply(command, &mut conn, &mut addresses, &mut priority)
                        .await;
                    if flow.is_break() {
                        break;
                    }
                }
                Stimulus::Event(event) => {
                    if let Some(c) = conn.as_mut() {
                        c.dispatch(event).await;
                    }
                }
                Stimulus::Tick => {}
            }
        }
        Ok(())
    }

    async fn apply(
        &self,
        command: Command,
        conn: &mut Option<Connection<W>>,
        addresses: &mut HashMap<PaymentAddress, Duration>,
        priority: &mut Option<PaymentAddress>,
    ) -> ControlFlow<()> {
        match command {
            Command::Quit => return ControlFlow::Break(()),
            Command::Disconnect => {
                debug!("disconnecting");
                *conn = None;
            }
            Command::Connect(url) => {
                // Tear down first; a half-alive connection must never
                // outlive a connect attempt.
                *conn = None;
                match self.connector.connect(&url).await {
                    Ok(bus) => {
                        debug!(%url, "connected");
                        let mut c =
                            Connection::new(bus, Arc::clone(&self.db), Arc::clone(&self.hooks));
                        c.start();
                        for (address, poll) in addresses.iter() {
                            c.watch_address(*address, effective_poll(*address, *poll, *priority));
                        }
                        *conn = Some(c);
                    }
                    Err(error) => {
                        warn!(%url, %error, "connect failed");
                        self.hooks.on_fail(&error.into()).await;
                    }
                }
            }
            Command::WatchTx(txid) => {
                if let Some(c) = conn.as_mut() {
                    c.watch_tx(txid);
                }
            }
            Command::WatchAddr { address, poll } => {
                addresses.insert(address, poll);
                if let Some(c) = conn.as_mut() {
                    c.watch_address(address, effective_poll(address, poll, *priority));
                }
            }
            Command::Send(tx) => match conn.as_mut() {
                Some(c) => c.send(tx).await,
                None => {
                    // Stored unsent; the next connection's start-up
                    // sweep broadcasts it.
                    let (_, fresh) = self.db.lock().send(&tx);
                    if fresh {
                        self.hooks.on_add(&tx).await;
                    }
                }
            },
            Command::Prioritize(new) => {
                let old = std::mem::replace(priority, new);
                if let Some(address) = new {
                    addresses.entry(address).or_insert(DEFAULT_ADDRESS_POLL);
                }
                if let Some(c) = conn.as_mut() {
                    if let Some(address) = old.filter(|a| new != Some(*a)) {
                        if let Some(poll) = addresses.get(&address) {
                            c.watch_address(address, *poll);
                        }
                    }
                    if let Some(address) = new {
                        c.watch_address(address, PRIORITY_ADDRESS_POLL);
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn post(&self, command: Command) {
        // A send failure means the loop is gone, which makes the
        // command moot anyway.
        let _ = self.cmd_tx.send(command.encode());
    }
}

fn effective_poll(
    address: PaymentAddress,
    configured: Duration,
    priority: Option<PaymentAddress>,
) -> Duration {
    if priority == Some(address) {
        PRIORITY_ADDRESS_POLL
    } else {
        configured
    }
}
