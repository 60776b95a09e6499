use super::{RECV_TIMEOUT, app, test_config, write_request};
use crate::app::TxnRequest;
use tern_common::config::ClusterConfig;
use tern_common::error::TernError;
use tern_core::envelope::Response;
use googletest::prelude::*;
use rstest::rstest;

#[rstest]
fn ping_round_trips_through_the_scheduler() {
    let app = app(test_config(1));
    app.send_ping().expect("ping must send");

    let response = app
        .recv_response(RECV_TIMEOUT)
        .expect("a pong must arrive");
    let Response::Pong { dst, .. } = response else {
        panic!("ping must produce a pong");
    };
    assert_that!(dst, eq(app.config.local_machine_id()));
}

#[rstest]
fn stats_dump_is_valid_json_with_lock_manager_section() {
    let mut app = app(test_config(1));
    let _ = app
        .submit(write_request(b"3", b"v"))
        .expect("submit must succeed");
    let _ = app
        .next_completed(RECV_TIMEOUT)
        .expect("txn must complete");

    app.request_stats(2).expect("stats request must send");
    let response = app
        .recv_response(RECV_TIMEOUT)
        .expect("stats must arrive");
    let Response::Stats { json } = response else {
        panic!("stats request must produce a stats response");
    };

    let parsed: serde_json::Value =
        serde_json::from_str(&json).expect("stats dump must be valid JSON");
    assert_that!(parsed.get("lock_manager").is_some(), eq(true));
    assert_that!(parsed.get("metrics").is_some(), eq(true));
}

#[rstest]
fn keys_outside_the_local_partition_are_rejected() {
    let config = ClusterConfig {
        num_partitions: 2,
        ..test_config(1)
    };
    let mut app = app(config);
    // Key "1" routes to partition 1 while this process owns partition 0.
    assert_that!(
        app.submit(write_request(b"1", b"v")),
        eq(&Err(TernError::InvalidTransaction(
            "key is outside the local partition"
        )))
    );
}

#[rstest]
fn malformed_remaster_requests_are_rejected() {
    let mut app = app(test_config(2));
    let two_keys = TxnRequest {
        write_set: vec![
            (b"0".to_vec(), Vec::new()),
            (b"2".to_vec(), Vec::new()),
        ],
        new_master: Some(1),
        ..TxnRequest::default()
    };
    assert_that!(
        app.submit(two_keys),
        eq(&Err(TernError::InvalidTransaction(
            "remaster must name exactly one written key"
        )))
    );

    let out_of_range = TxnRequest {
        write_set: vec![(b"0".to_vec(), Vec::new())],
        new_master: Some(9),
        ..TxnRequest::default()
    };
    assert_that!(
        app.submit(out_of_range),
        eq(&Err(TernError::InvalidTransaction(
            "remaster destination is outside the replica space"
        )))
    );
}

#[rstest]
fn resolver_trigger_leaves_normal_traffic_untouched() {
    let mut app = app(test_config(1));
    app.trigger_resolver();

    let txn_id = app
        .submit(write_request(b"5", b"v"))
        .expect("submit must succeed");
    let done = app
        .next_completed(RECV_TIMEOUT)
        .expect("txn must complete");
    assert_that!(done.id(), eq(txn_id));
}
