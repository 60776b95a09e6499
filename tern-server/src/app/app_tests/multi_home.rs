use super::{RECV_TIMEOUT, app, test_config, write_request};
use crate::app::TxnRequest;
use tern_core::txn::TxnStatus;
use tern_storage::Storage;
use googletest::prelude::*;
use rstest::rstest;

#[rstest]
fn multi_home_write_joins_fragments_and_commits() {
    // With two replicas and one partition, key "0" is mastered by replica 0 and
    // key "1" by replica 1, so this transaction is multi-home.
    let mut app = app(test_config(2));
    let txn_id = app
        .submit(TxnRequest {
            write_set: vec![
                (b"0".to_vec(), b"home-0".to_vec()),
                (b"1".to_vec(), b"home-1".to_vec()),
            ],
            ..TxnRequest::default()
        })
        .expect("submit must succeed");

    let done = app
        .next_completed(RECV_TIMEOUT)
        .expect("multi-home txn must complete");
    assert_that!(done.id(), eq(txn_id));
    assert_that!(done.status, eq(TxnStatus::Committed));

    for (key, value) in [(b"0", b"home-0"), (b"1", b"home-1")] {
        let record = app
            .storage
            .read(&key.to_vec())
            .expect("fragmented write must reach storage");
        assert_that!(&record.value, eq(&value.to_vec()));
    }
}

#[rstest]
fn multi_home_keeps_conflicting_single_home_traffic_ordered() {
    let mut app = app(test_config(2));
    let multi = app
        .submit(TxnRequest {
            write_set: vec![
                (b"0".to_vec(), b"mh".to_vec()),
                (b"1".to_vec(), b"mh".to_vec()),
            ],
            ..TxnRequest::default()
        })
        .expect("submit must succeed");
    let single = app
        .submit(write_request(b"0", b"sh"))
        .expect("submit must succeed");

    assert_that!(
        app.next_completed(RECV_TIMEOUT)
            .expect("multi-home txn must complete")
            .id(),
        eq(multi)
    );
    assert_that!(
        app.next_completed(RECV_TIMEOUT)
            .expect("single-home txn must complete")
            .id(),
        eq(single)
    );

    let record = app
        .storage
        .read(&b"0".to_vec())
        .expect("writes must reach storage");
    assert_that!(&record.value, eq(&b"sh".to_vec()));
}

#[rstest]
fn remaster_moves_a_key_and_refreshes_metadata() {
    let mut app = app(test_config(2));
    // Seed the record under its arithmetic master, replica 0.
    let _ = app
        .submit(write_request(b"0", b"seed"))
        .expect("submit must succeed");
    let _ = app.next_completed(RECV_TIMEOUT).expect("seed must commit");

    let remaster_id = app
        .submit(TxnRequest {
            write_set: vec![(b"0".to_vec(), Vec::new())],
            new_master: Some(1),
            ..TxnRequest::default()
        })
        .expect("remaster must submit");
    let done = app
        .next_completed(RECV_TIMEOUT)
        .expect("remaster must complete");
    assert_that!(done.id(), eq(remaster_id));
    assert_that!(done.status, eq(TxnStatus::Committed));

    let metadata = app
        .storage
        .master_of(&b"0".to_vec())
        .expect("record must remain");
    assert_that!(metadata.master, eq(1));
    assert_that!(metadata.counter, eq(1));

    // A follow-up write captures the refreshed metadata and commits under the
    // new master.
    let follow_up = app
        .submit(write_request(b"0", b"after-move"))
        .expect("submit must succeed");
    let done = app
        .next_completed(RECV_TIMEOUT)
        .expect("follow-up must complete");
    assert_that!(done.id(), eq(follow_up));
    assert_that!(done.status, eq(TxnStatus::Committed));
}

#[rstest]
fn remaster_to_the_current_master_is_rejected() {
    let mut app = app(test_config(2));
    let result = app.submit(TxnRequest {
        write_set: vec![(b"0".to_vec(), Vec::new())],
        new_master: Some(0),
        ..TxnRequest::default()
    });
    assert_that!(result.is_err(), eq(true));
}
