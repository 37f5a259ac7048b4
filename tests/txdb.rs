use atalaya::address::{PaymentAddress, P2PKH_VERSION};
use atalaya::txdb::{TxDb, TxState};
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};

fn input(outpoint: OutPoint) -> TxIn {
    TxIn {
        previous_output: outpoint,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }
}

/// A transaction paying `value` to `address`; `salt` makes the hash
/// unique by varying the (fictional) funding outpoint.
fn tx_paying(address: &PaymentAddress, value: u64, salt: u8) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![input(OutPoint::new(Txid::from_byte_array([salt; 32]), 0))],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: address.script_pubkey(),
        }],
    }
}

fn tx_spending(outpoint: OutPoint) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![input(outpoint)],
        output: vec![TxOut {
            value: Amount::from_sat(1),
            script_pubkey: ScriptBuf::new(),
        }],
    }
}

fn addr(b: u8) -> PaymentAddress {
    PaymentAddress::new(P2PKH_VERSION, [b; 20])
}

#[test]
fn insert_is_idempotent_and_never_downgrades() {
    let mut db = TxDb::new();
    let tx = tx_paying(&addr(1), 1_000, 1);

    let (txid, fresh) = db.insert(&tx, TxState::Unconfirmed);
    assert!(fresh);
    let (again, fresh) = db.insert(&tx, TxState::Unconfirmed);
    assert_eq!(txid, again);
    assert!(!fresh, "re-inserting a known hash is not a fresh add");

    db.confirmed(txid, 10);
    // A late duplicate insert must not stomp the confirmed state:
    let (_, fresh) = db.insert(&tx, TxState::Unsent);
    assert!(!fresh);
    assert_eq!(db.get_tx_height(&txid), 10);
}

#[test]
fn height_is_nonzero_exactly_for_confirmed_rows() {
    let mut db = TxDb::new();
    let unsent = tx_paying(&addr(1), 100, 1);
    let unconfirmed = tx_paying(&addr(1), 200, 2);
    let confirmed = tx_paying(&addr(1), 300, 3);

    let (h_unsent, _) = db.send(&unsent);
    let (h_unconf, _) = db.insert(&unconfirmed, TxState::Unconfirmed);
    let (h_conf, _) = db.insert(&confirmed, TxState::Unconfirmed);
    db.confirmed(h_conf, 123);

    assert_eq!(db.get_tx_height(&h_unsent), 0);
    assert_eq!(db.get_tx_height(&h_unconf), 0);
    assert_eq!(db.get_tx_height(&h_conf), 123);
    assert_eq!(db.get_tx_height(&Txid::from_byte_array([0xaa; 32])), 0);
    assert!(!db.has_tx(&Txid::from_byte_array([0xaa; 32])));
}

#[test]
fn count_unconfirmed_tracks_state() {
    let mut db = TxDb::new();
    let (a, _) = db.insert(&tx_paying(&addr(1), 1, 1), TxState::Unconfirmed);
    db.insert(&tx_paying(&addr(1), 2, 2), TxState::Unconfirmed);
    db.send(&tx_paying(&addr(1), 3, 3));
    assert_eq!(db.count_unconfirmed(), 2);

    db.confirmed(a, 5);
    assert_eq!(db.count_unconfirmed(), 1);
}

#[test]
fn utxos_require_confirmation_and_no_spender() {
    let mut db = TxDb::new();
    let a = addr(1);
    let funding = tx_paying(&a, 1_000, 1);
    let (h_funding, _) = db.insert(&funding, TxState::Unconfirmed);

    // Unconfirmed parents contribute nothing:
    assert!(db.get_utxos(Some(&a)).is_empty());

    db.confirmed(h_funding, 100);
    let utxos = db.get_utxos(Some(&a));
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].outpoint, OutPoint::new(h_funding, 0));
    assert_eq!(utxos[0].value, Amount::from_sat(1_000));

    // Another address sees nothing:
    assert!(db.get_utxos(Some(&addr(9))).is_empty());
    // The unfiltered view contains the output too:
    assert_eq!(db.get_utxos(None).len(), 1);

    // Any spender in the database hides the output, confirmed or not:
    let spend = tx_spending(OutPoint::new(h_funding, 0));
    db.insert(&spend, TxState::Unconfirmed);
    assert!(db.get_utxos(Some(&a)).is_empty());
    assert!(db.get_utxos(None).is_empty());
}

#[test]
fn reconfirmation_at_new_height_flags_next_lower_rows() {
    let mut db = TxDb::new();
    let (h_x, _) = db.insert(&tx_paying(&addr(1), 1, 1), TxState::Unconfirmed);
    let (h_y, _) = db.insert(&tx_paying(&addr(1), 2, 2), TxState::Unconfirmed);
    let (h_z, _) = db.insert(&tx_paying(&addr(1), 3, 3), TxState::Unconfirmed);
    db.confirmed(h_x, 200);
    db.confirmed(h_y, 150);
    db.confirmed(h_z, 100);
    assert!(db.forked_txids().is_empty());

    // The indexer moves h_x to a different block: fork suspicion at the
    // next-lower populated height (150), and nowhere below it.
    db.confirmed(h_x, 201);
    assert_eq!(db.get_tx_height(&h_x), 201);
    assert_eq!(db.forked_txids(), vec![h_y]);

    // The re-query comes back at the same height and resolves the flag:
    db.confirmed(h_y, 150);
    assert!(db.forked_txids().is_empty());
}

#[test]
fn unconfirming_a_confirmed_row_is_a_fork_signal() {
    let mut db = TxDb::new();
    let (h_x, _) = db.insert(&tx_paying(&addr(1), 1, 1), TxState::Unconfirmed);
    let (h_y, _) = db.insert(&tx_paying(&addr(1), 2, 2), TxState::Unconfirmed);
    db.confirmed(h_x, 200);
    db.confirmed(h_y, 150);

    db.unconfirmed(h_x);
    // h_x dropped out of its block: back to unconfirmed, and the rows
    // just below its old height are suspect.
    assert_eq!(db.get_tx_height(&h_x), 0);
    assert_eq!(db.count_unconfirmed(), 1);
    assert_eq!(db.forked_txids(), vec![h_y]);

    // Unknown hashes are ignored:
    db.unconfirmed(Txid::from_byte_array([0xbb; 32]));
}

#[test]
fn at_height_reports_changes_and_checks_forks() {
    let mut db = TxDb::new();
    assert!(db.at_height(100));
    assert_eq!(db.last_height(), 100);
    assert!(!db.at_height(100), "same height is not a change");

    let (h_x, _) = db.insert(&tx_paying(&addr(1), 1, 1), TxState::Unconfirmed);
    db.confirmed(h_x, 100);
    assert!(db.at_height(101));
    // The tip moved, so the topmost populated height is suspect:
    assert_eq!(db.forked_txids(), vec![h_x]);
}

#[test]
fn forget_removes_unconditionally() {
    let mut db = TxDb::new();
    let tx = tx_paying(&addr(1), 1, 1);
    let (txid, _) = db.send(&tx);
    assert!(db.has_tx(&txid));
    assert_eq!(db.unsent_txs().len(), 1);

    db.forget(txid);
    assert!(!db.has_tx(&txid));
    assert!(db.unsent_txs().is_empty());
    assert_eq!(db.get_tx(&txid), None);
}
