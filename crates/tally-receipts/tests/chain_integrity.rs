use std::path::{Path, PathBuf};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use rusqlite::params;
use tally_core::Receipt;
use tally_core::util::{chain_hash, sha256_hex};
use tally_receipts::{ChainFault, ChainStatus, Ledger, LedgerError, LedgerOptions, SqliteLedger};

async fn open(path: &Path) -> SqliteLedger {
    SqliteLedger::open(LedgerOptions::new(path.to_path_buf()))
        .await
        .unwrap()
}

fn db_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("test_ledger.db")
}

async fn seeded(path: &Path, n: usize) -> (SqliteLedger, Vec<Receipt>) {
    let ledger = open(path).await;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut r = Receipt::pending(
            format!("uuid-{i}"),
            format!(r#"{{"total":{}}}"#, (i + 1) * 10).into_bytes(),
            format!("sig{i}").into_bytes(),
            format!("2026-10-19T08:00:0{i}Z"),
        );
        ledger.append(&mut r).await.unwrap();
        out.push(r);
    }
    (ledger, out)
}

fn tamper(path: &Path, sql: &str, p: impl rusqlite::Params) {
    let conn = rusqlite::Connection::open(path).unwrap();
    let changed = conn.execute(sql, p).unwrap();
    assert_eq!(changed, 1);
}

#[tokio::test]
async fn genesis_and_second_receipt_match_reference_hashes() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open(&db_path(&dir)).await;

    let mut r1 = Receipt::pending(
        "uuid-1",
        br#"{"total": 10}"#.to_vec(),
        b"sig1".to_vec(),
        "...T1",
    );
    ledger.append(&mut r1).await.unwrap();
    assert_eq!(r1.prev_hash, None);
    assert_eq!(r1.hash, sha256_hex(br#"{"total": 10}sig1"#));
    assert_eq!(ledger.last_hash().await.unwrap(), Some(r1.hash.clone()));

    let mut r2 = Receipt::pending(
        "uuid-2",
        br#"{"total": 20}"#.to_vec(),
        b"sig2".to_vec(),
        "...T2",
    );
    ledger.append(&mut r2).await.unwrap();
    assert_eq!(r2.prev_hash.as_deref(), Some(r1.hash.as_str()));

    let mut expected = r1.hash.as_bytes().to_vec();
    expected.extend_from_slice(br#"{"total": 20}"#);
    expected.extend_from_slice(b"sig2");
    assert_eq!(r2.hash, sha256_hex(&expected));
    assert_eq!(ledger.last_hash().await.unwrap(), Some(r2.hash.clone()));

    assert!(ledger.verify_chain().await.unwrap());
}

#[tokio::test]
async fn every_receipt_links_to_its_predecessor() {
    let dir = tempfile::tempdir().unwrap();
    let (_ledger, receipts) = seeded(&db_path(&dir), 6).await;
    for pair in receipts.windows(2) {
        assert_eq!(pair[1].prev_hash.as_deref(), Some(pair[0].hash.as_str()));
    }
}

#[tokio::test]
async fn verify_is_repeatable_and_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let (ledger, receipts) = seeded(&db_path(&dir), 4).await;
    let before = ledger.list(100, 0).await.unwrap();

    for _ in 0..3 {
        assert!(ledger.verify_chain().await.unwrap());
    }
    assert_eq!(ledger.list(100, 0).await.unwrap(), before);
    assert_eq!(
        ledger.audit_chain().await.unwrap(),
        ChainStatus::Intact { receipts: 4 }
    );
    assert_eq!(
        ledger.last_hash().await.unwrap().as_deref(),
        Some(receipts[3].hash.as_str())
    );
}

#[tokio::test]
async fn ledger_reopens_with_same_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let (ledger, receipts) = seeded(&path, 3).await;
    drop(ledger);

    let reopened = open(&path).await;
    assert_eq!(
        reopened.last_hash().await.unwrap(),
        Some(receipts[2].hash.clone())
    );
    let mut next = Receipt::pending("uuid-next", b"p".to_vec(), b"s".to_vec(), "T");
    reopened.append(&mut next).await.unwrap();
    assert_eq!(next.prev_hash, Some(receipts[2].hash.clone()));
    assert!(reopened.verify_chain().await.unwrap());
}

#[tokio::test]
async fn altered_payload_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let (ledger, _) = seeded(&path, 4).await;

    tamper(
        &path,
        "UPDATE receipts SET payload = ?1 WHERE id = ?2",
        params![br#"{"total":9999}"#.to_vec(), "uuid-1"],
    );

    assert!(!ledger.verify_chain().await.unwrap());
    let status = ledger.audit_chain().await.unwrap();
    let ChainStatus::Broken { index, id, fault } = status else {
        panic!("expected a broken chain");
    };
    assert_eq!(index, 1);
    assert_eq!(id, "uuid-1");
    assert!(matches!(fault, ChainFault::HashMismatch { .. }));
}

#[tokio::test]
async fn altered_signature_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let (ledger, _) = seeded(&path, 3).await;

    tamper(
        &path,
        "UPDATE receipts SET signature = ?1 WHERE id = ?2",
        params![b"forged".to_vec(), "uuid-0"],
    );

    assert!(!ledger.verify_chain().await.unwrap());
}

#[tokio::test]
async fn altered_hash_is_detected_even_on_last_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let (ledger, _) = seeded(&path, 3).await;

    tamper(
        &path,
        "UPDATE receipts SET hash = ?1 WHERE id = ?2",
        params!["0".repeat(64), "uuid-2"],
    );

    let status = ledger.audit_chain().await.unwrap();
    assert!(matches!(
        status,
        ChainStatus::Broken { index: 2, fault: ChainFault::HashMismatch { .. }, .. }
    ));
}

#[tokio::test]
async fn rewritten_hash_with_consistent_successor_is_still_detected() {
    // Rewriting a row and its own hash is not enough: the successor's prev_hash still
    // points at the digest that was first committed.
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let (ledger, receipts) = seeded(&path, 3).await;

    let forged_payload = br#"{"total":1}"#.to_vec();
    let forged_hash = chain_hash(
        Some(&receipts[0].hash),
        &forged_payload,
        &receipts[1].signature,
    );
    tamper(
        &path,
        "UPDATE receipts SET payload = ?1, hash = ?2 WHERE id = ?3",
        params![forged_payload, forged_hash, "uuid-1"],
    );

    let status = ledger.audit_chain().await.unwrap();
    assert!(matches!(
        status,
        ChainStatus::Broken { index: 2, fault: ChainFault::LinkMismatch { .. }, .. }
    ));
}

#[tokio::test]
async fn deleted_row_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let (ledger, receipts) = seeded(&path, 4).await;

    tamper(&path, "DELETE FROM receipts WHERE id = ?1", params!["uuid-1"]);

    assert_eq!(
        ledger.audit_chain().await.unwrap(),
        ChainStatus::Broken {
            index: 1,
            id: "uuid-2".to_string(),
            fault: ChainFault::LinkMismatch {
                expected: Some(receipts[0].hash.clone()),
                found: Some(receipts[1].hash.clone()),
            },
        }
    );
}

#[tokio::test]
async fn reordered_row_is_detected() {
    // Deleting and re-inserting a row moves it to the end of the insertion order.
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let (ledger, receipts) = seeded(&path, 3).await;

    let conn = rusqlite::Connection::open(&path).unwrap();
    let r = &receipts[0];
    conn.execute("DELETE FROM receipts WHERE id = ?1", params![r.id]).unwrap();
    conn.execute(
        "INSERT INTO receipts (id, payload, signature, prev_hash, hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![r.id, r.payload, r.signature, r.prev_hash, r.hash, r.created_at],
    )
    .unwrap();

    assert!(!ledger.verify_chain().await.unwrap());
}

#[tokio::test]
async fn hash_collision_surfaces_as_duplicate_hash() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let ledger = open(&path).await;

    // Plant a row holding the hash the next append will compute, then make "tail-b" the
    // tail so the append links to it.
    let colliding = chain_hash(Some("tail-b"), b"p", b"s");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute(
        "INSERT INTO receipts (id, payload, signature, prev_hash, hash, created_at)
         VALUES ('planted-a', x'00', x'00', NULL, ?1, 'T0')",
        params![colliding],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO receipts (id, payload, signature, prev_hash, hash, created_at)
         VALUES ('planted-b', x'00', x'00', NULL, 'tail-b', 'T0')",
        [],
    )
    .unwrap();

    let mut r = Receipt::pending("uuid-1", b"p".to_vec(), b"s".to_vec(), "T1");
    let err = ledger.append(&mut r).await.unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateHash { ref hash } if *hash == colliding));
    assert!(r.hash.is_empty());
    assert_eq!(ledger.count().await.unwrap(), 2);
}

#[tokio::test]
async fn concurrent_appends_on_one_handle_never_share_a_tail() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(open(&db_path(&dir)).await);

    let mut a = Receipt::pending("a", b"pa".to_vec(), b"sa".to_vec(), "T");
    let mut b = Receipt::pending("b", b"pb".to_vec(), b"sb".to_vec(), "T");
    let (ra, rb) = tokio::join!(ledger.append(&mut a), ledger.append(&mut b));
    ra.unwrap();
    rb.unwrap();

    let (first, second) = if a.prev_hash.is_none() { (&a, &b) } else { (&b, &a) };
    assert_eq!(first.prev_hash, None);
    assert_eq!(second.prev_hash.as_deref(), Some(first.hash.as_str()));
    assert!(ledger.verify_chain().await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_from_separate_connections_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let first = Arc::new(open(&path).await);
    let second = Arc::new(open(&path).await);

    let mut tasks = Vec::new();
    for w in 0..8 {
        let ledger = if w % 2 == 0 { first.clone() } else { second.clone() };
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                let mut r = Receipt::pending(
                    format!("w{w}-{i}"),
                    format!("payload {w} {i}").into_bytes(),
                    vec![w as u8; 64],
                    "T",
                );
                ledger.append(&mut r).await.unwrap();
            }
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    assert_eq!(first.count().await.unwrap(), 80);
    assert_eq!(
        first.audit_chain().await.unwrap(),
        ChainStatus::Intact { receipts: 80 }
    );
    let genesis_count = first
        .list(100, 0)
        .await
        .unwrap()
        .iter()
        .filter(|r| r.prev_hash.is_none())
        .count();
    assert_eq!(genesis_count, 1);
}
