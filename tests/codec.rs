use async_trait::async_trait;
use atalaya::address::{PaymentAddress, P2PKH_VERSION};
use atalaya::bus::MessageBus;
use atalaya::codec::{HistoryRow, IndexerCodec};
use atalaya::error::{IndexerError, TransportError};
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every request and answers from a scripted reply queue.
struct ScriptedBus {
    calls: Mutex<Vec<(String, Vec<u8>)>>,
    replies: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
}

impl ScriptedBus {
    fn new(replies: Vec<Result<Vec<u8>, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into()),
        })
    }

    fn calls(&self) -> Vec<(String, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBus for ScriptedBus {
    async fn request(&self, method: &str, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        self.calls.lock().unwrap().push((method.to_owned(), body));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(TransportError::ConnectFailed))
    }
}

/// A bus whose requests never complete.
struct StuckBus;

#[async_trait]
impl MessageBus for StuckBus {
    async fn request(&self, _m: &str, _b: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        futures::future::pending().await
    }
}

fn ok(body: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut reply = 0u32.to_le_bytes().to_vec();
    reply.extend_from_slice(body);
    Ok(reply)
}

fn status(code: u32) -> Result<Vec<u8>, TransportError> {
    Ok(code.to_le_bytes().to_vec())
}

fn sample_tx() -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([5u8; 32]), 1),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(900),
            script_pubkey: ScriptBuf::new(),
        }],
    }
}

fn history_row_bytes(
    output: OutPoint,
    output_height: u64,
    value: u64,
    spend: Option<OutPoint>,
    spend_height: u64,
) -> Vec<u8> {
    let mut row = Vec::with_capacity(96);
    row.extend_from_slice(&output.txid.to_byte_array());
    row.extend_from_slice(&output.vout.to_le_bytes());
    row.extend_from_slice(&output_height.to_le_bytes());
    row.extend_from_slice(&value.to_le_bytes());
    match spend {
        Some(point) => {
            row.extend_from_slice(&point.txid.to_byte_array());
            row.extend_from_slice(&point.vout.to_le_bytes());
        }
        None => row.extend_from_slice(&[0u8; 36]),
    }
    row.extend_from_slice(&spend_height.to_le_bytes());
    row
}

#[tokio::test]
async fn fetch_last_height_round_trips() {
    let bus = ScriptedBus::new(vec![ok(&42u64.to_le_bytes())]);
    let codec = IndexerCodec::new(bus.clone());

    assert_eq!(codec.fetch_last_height().await.unwrap(), 42);
    assert_eq!(
        bus.calls(),
        vec![("blockchain.fetch_last_height".to_owned(), Vec::new())]
    );
}

#[tokio::test]
async fn fetch_history_encodes_the_address_and_parses_rows() {
    let funding = OutPoint::new(Txid::from_byte_array([1u8; 32]), 0);
    let spender = OutPoint::new(Txid::from_byte_array([2u8; 32]), 3);

    let mut body = history_row_bytes(funding, 100, 1_000, None, 0);
    body.extend_from_slice(&history_row_bytes(funding, 100, 1_000, Some(spender), 101));

    let bus = ScriptedBus::new(vec![ok(&body)]);
    let codec = IndexerCodec::new(bus.clone());

    let address = PaymentAddress::new(P2PKH_VERSION, [7u8; 20]);
    let rows = codec.fetch_history(&address, 0).await.unwrap();
    assert_eq!(
        rows,
        vec![
            HistoryRow {
                output: funding,
                output_height: 100,
                value: Amount::from_sat(1_000),
                spend: None,
                spend_height: 0,
            },
            HistoryRow {
                output: funding,
                output_height: 100,
                value: Amount::from_sat(1_000),
                spend: Some(spender),
                spend_height: 101,
            },
        ]
    );

    let calls = bus.calls();
    assert_eq!(calls[0].0, "address.fetch_history");
    let mut expected = vec![P2PKH_VERSION];
    expected.extend_from_slice(&[7u8; 20]);
    expected.extend_from_slice(&0u32.to_le_bytes());
    assert_eq!(calls[0].1, expected);
}

#[tokio::test]
async fn fetch_transaction_round_trips_and_maps_not_found() {
    let tx = sample_tx();
    let bus = ScriptedBus::new(vec![ok(&encode::serialize(&tx)), status(1)]);
    let codec = IndexerCodec::new(bus.clone());

    let txid = tx.compute_txid();
    assert_eq!(codec.fetch_transaction(txid).await.unwrap(), tx);
    assert_eq!(
        codec.fetch_transaction(txid).await,
        Err(IndexerError::NotFound)
    );

    let calls = bus.calls();
    assert_eq!(calls[0].0, "blockchain.fetch_transaction");
    assert_eq!(calls[0].1, txid.to_byte_array().to_vec());
}

#[tokio::test]
async fn mempool_fetch_uses_the_pool_method() {
    let tx = sample_tx();
    let bus = ScriptedBus::new(vec![ok(&encode::serialize(&tx))]);
    let codec = IndexerCodec::new(bus.clone());

    codec
        .fetch_unconfirmed_transaction(tx.compute_txid())
        .await
        .unwrap();
    assert_eq!(bus.calls()[0].0, "transaction_pool.fetch_transaction");
}

#[tokio::test]
async fn fetch_transaction_index_parses_the_placement() {
    let mut body = 77u64.to_le_bytes().to_vec();
    body.extend_from_slice(&3u64.to_le_bytes());
    let bus = ScriptedBus::new(vec![ok(&body), status(1)]);
    let codec = IndexerCodec::new(bus.clone());

    let txid = Txid::from_byte_array([9u8; 32]);
    assert_eq!(codec.fetch_transaction_index(txid).await.unwrap(), (77, 3));
    // An unconfirmed transaction has no index:
    assert_eq!(
        codec.fetch_transaction_index(txid).await,
        Err(IndexerError::NotFound)
    );
    assert_eq!(bus.calls()[0].0, "blockchain.fetch_transaction_index");
}

#[tokio::test]
async fn broadcast_carries_the_raw_tx_and_surfaces_rejections() {
    let tx = sample_tx();
    let bus = ScriptedBus::new(vec![ok(&[]), status(70)]);
    let codec = IndexerCodec::new(bus.clone());

    assert_eq!(codec.broadcast_transaction(&tx).await, Ok(()));
    assert_eq!(
        codec.broadcast_transaction(&tx).await,
        Err(IndexerError::Server(70))
    );

    let calls = bus.calls();
    assert_eq!(calls[0].0, "protocol.broadcast_transaction");
    assert_eq!(calls[0].1, encode::serialize(&tx));
}

#[tokio::test]
async fn malformed_replies_are_decode_errors() {
    let bus = ScriptedBus::new(vec![
        Ok(vec![0u8, 0]),            // shorter than a status word
        ok(&[1, 2, 3]),              // bad height payload
        ok(b"definitely not a tx"),  // bad tx payload
    ]);
    let codec = IndexerCodec::new(bus);

    let decode = IndexerError::Transport(TransportError::Decode);
    assert_eq!(codec.fetch_last_height().await, Err(decode));
    assert_eq!(codec.fetch_last_height().await, Err(decode));
    assert_eq!(
        codec
            .fetch_transaction(Txid::from_byte_array([1u8; 32]))
            .await,
        Err(decode)
    );
}

#[tokio::test(start_paused = true)]
async fn requests_time_out() {
    let codec = IndexerCodec::new(Arc::new(StuckBus)).with_timeout(Duration::from_millis(50));
    assert_eq!(
        codec.fetch_last_height().await,
        Err(IndexerError::Transport(TransportError::Timeout))
    );
}
