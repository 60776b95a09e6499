use std::time::Duration;

use tracing::info;

use tern_common::config::ClusterConfig;
use tern_common::error::TernResult;
use tern_core::envelope::Response;
use tern_core::txn::TxnStatus;

use super::PartitionApp;
use crate::workload::{BasicWorkload, WorkloadParams};

const DEMO_TXNS: usize = 1_000;
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);

/// Starts one partition process and drives it with the basic workload.
///
/// Without an external sequencer attached, the binary doubles as a self-contained
/// smoke run: it submits a batch of generated transactions, waits for completions,
/// and prints a stats dump.
pub(super) fn run_server() -> TernResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ClusterConfig::default();
    let mut app = PartitionApp::new(config.clone())?;
    println!("{}", app.startup_summary());

    let mut generator = BasicWorkload::new(&config, WorkloadParams::default(), 0);
    for _ in 0..DEMO_TXNS {
        let _ = app.submit(generator.next_request())?;
    }

    let mut committed = 0_usize;
    let mut aborted = 0_usize;
    for _ in 0..DEMO_TXNS {
        let Some(txn) = app.next_completed(COMPLETION_TIMEOUT) else {
            break;
        };
        match txn.status {
            TxnStatus::Committed => committed += 1,
            _ => aborted += 1,
        }
    }
    info!(committed, aborted, "demo workload drained");

    app.request_stats(1)?;
    if let Some(Response::Stats { json }) = app.recv_response(Duration::from_secs(2)) {
        println!("{json}");
    }

    app.shutdown();
    Ok(())
}
