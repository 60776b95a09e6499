//! Background deadlock resolver for the DDR lock manager.
//!
//! Periodically the resolver takes a snapshot of the wait-for graph, deterministically
//! resolves any deadlocks found in it, and applies the changes back to the live graph.
//! It forms strongly connected components and only rewrites the "stable" ones. The
//! live graph keeps growing while the resolver runs, so the write-back must never
//! clobber additions made after the snapshot: for a transaction in a stable component
//! the waiting-for counter cannot change and the waited-by list can only grow at the
//! tail, which makes overwriting the snapshotted prefix and the counter safe.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use tern_common::config::ClusterConfig;
use tern_common::ids::{MachineId, SENTINEL_TXN_ID, TxnId};
use tern_common::metrics::MetricsRepositoryManager;
use tern_core::containers::HotMap;
use tern_core::envelope::{Envelope, Request};

use crate::lock_manager::{SharedGraph, TxnInfo};
use crate::scheduler::SchedulerInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComponentType {
    Unassigned,
    Stable,
    Unstable,
}

#[derive(Debug)]
struct Node {
    is_complete: bool,
    redges: Vec<TxnId>,
    visited: bool,
    comp_type: ComponentType,
}

impl Node {
    fn new(is_complete: bool) -> Self {
        Self {
            is_complete,
            redges: Vec::new(),
            visited: false,
            comp_type: ComponentType::Unassigned,
        }
    }
}

/// Outcome of one resolver pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverRun {
    /// Nodes that ended up in unstable components.
    pub unstable_graph_sz: usize,
    /// Nodes in stable components of two or more transactions.
    pub stable_graph_sz: usize,
    /// Stable components rewritten.
    pub deadlocks_resolved: usize,
    /// Transactions made ready by the rewrites, also pushed to the shared ready list.
    pub newly_ready: Vec<TxnId>,
}

/// Deterministic deadlock resolver over a snapshot of the wait-for graph.
#[derive(Debug)]
pub struct DeadlockResolver {
    graph: Arc<SharedGraph>,
    signal: mpsc::Sender<SchedulerInput>,
    machine_id: MachineId,
    metrics: Arc<MetricsRepositoryManager>,
}

impl DeadlockResolver {
    /// Creates a resolver over `graph`, signalling the scheduler through `signal`.
    #[must_use]
    pub(crate) fn new(
        graph: Arc<SharedGraph>,
        signal: mpsc::Sender<SchedulerInput>,
        config: &ClusterConfig,
        metrics: Arc<MetricsRepositoryManager>,
    ) -> Self {
        Self {
            graph,
            signal,
            machine_id: config.local_machine_id(),
            metrics,
        }
    }

    /// Runs one snapshot/resolve/write-back pass.
    pub fn run_once(&self) -> ResolverRun {
        let started = Instant::now();
        let repo = self.metrics.register_current_thread();
        debug!("deadlock resolver woke up");

        let mut snapshot = self.graph.txn_info_guard().clone();

        // Build the transpose graph and a DFS post-order; reversed, that is a
        // topological order of the snapshot.
        let mut aux_graph: HotMap<TxnId, Node> = HotMap::default();
        let mut topo_order: Vec<TxnId> = Vec::with_capacity(snapshot.len());
        for (&txn_id, info) in &snapshot {
            let node = aux_graph
                .entry(txn_id)
                .or_insert_with(|| Node::new(info.is_complete()));
            if !node.visited {
                node.visited = true;
                find_topo_order_and_transpose(txn_id, &snapshot, &mut aux_graph, &mut topo_order);
            }
        }
        topo_order.reverse();

        // Form strongly connected components, traversing the transpose this time.
        // Each stable component with more than one member is a deadlock to resolve.
        let mut run = ResolverRun::default();
        let mut to_be_updated: Vec<TxnId> = Vec::new();
        let mut component: Vec<TxnId> = Vec::new();
        for &txn_id in &topo_order {
            let comp_type = aux_graph
                .get(&txn_id)
                .unwrap_or_else(|| panic!("topological order contains unknown txn {txn_id}"))
                .comp_type;
            if comp_type != ComponentType::Unassigned {
                continue;
            }
            component.clear();
            let is_stable =
                form_strongly_connected_component(txn_id, &mut aux_graph, &mut component);
            if !is_stable {
                run.unstable_graph_sz += component.len();
                for member in &component {
                    let node = aux_graph
                        .get_mut(member)
                        .unwrap_or_else(|| unreachable!("component members are in the graph"));
                    node.comp_type = ComponentType::Unstable;
                }
            } else if component.len() > 1 {
                run.stable_graph_sz += component.len();
                let resolution = resolve_deadlock(&mut snapshot, &mut component);
                repo.record_deadlock(
                    component.len(),
                    resolution.edges_removed,
                    resolution.edges_added,
                );
                if let Some(head) = resolution.ready {
                    run.newly_ready.push(head);
                }
                to_be_updated.extend(component.iter().copied());
                run.deadlocks_resolved += 1;
            }
        }

        if run.deadlocks_resolved > 0 {
            debug!(
                deadlocks = run.deadlocks_resolved,
                "found and resolved deadlock group(s)"
            );
        } else {
            debug!("no stable deadlock found");
        }

        // Apply the deadlock-free dependencies back to the live graph. Only the
        // snapshotted prefix of each waited-by list is overwritten; anything appended
        // since the snapshot is preserved.
        if !to_be_updated.is_empty() {
            let mut live = self.graph.txn_info_guard();
            for txn_id in &to_be_updated {
                let resolved = snapshot
                    .get(txn_id)
                    .unwrap_or_else(|| panic!("resolved txn {txn_id} is missing from the snapshot"));
                let live_info = live
                    .get_mut(txn_id)
                    .unwrap_or_else(|| panic!("resolved txn {txn_id} left the lock manager"));
                live_info.waited_by[..resolved.waited_by.len()]
                    .copy_from_slice(&resolved.waited_by);
                live_info.num_waiting_for = resolved.num_waiting_for;
            }
        }

        if !run.newly_ready.is_empty() {
            self.graph
                .ready_txns_guard()
                .extend(run.newly_ready.iter().copied());
            let woke_scheduler = self
                .signal
                .send(SchedulerInput::Envelope(Envelope {
                    from: self.machine_id,
                    request: Request::Signal,
                }))
                .is_ok();
            if !woke_scheduler {
                error!("scheduler input channel closed; ready txns will wait for a drain");
            }
        }

        let runtime_ns = i64::try_from(started.elapsed().as_nanos()).unwrap_or(i64::MAX);
        repo.record_resolver_run(
            runtime_ns,
            run.unstable_graph_sz,
            run.stable_graph_sz,
            run.deadlocks_resolved,
        );
        run
    }
}

fn find_topo_order_and_transpose(
    start: TxnId,
    snapshot: &HotMap<TxnId, TxnInfo>,
    aux_graph: &mut HotMap<TxnId, Node>,
    topo_order: &mut Vec<TxnId>,
) {
    let mut stack: Vec<(TxnId, usize)> = vec![(start, 0)];
    while let Some((txn_id, edge_index)) = stack.last().copied() {
        let info = snapshot
            .get(&txn_id)
            .unwrap_or_else(|| panic!("corrupted dependency graph: unknown txn {txn_id}"));
        if edge_index >= info.waited_by.len() {
            topo_order.push(txn_id);
            let _ = stack.pop();
            continue;
        }
        if let Some(frame) = stack.last_mut() {
            frame.1 += 1;
        }

        let successor = info.waited_by[edge_index];
        if successor == SENTINEL_TXN_ID {
            continue;
        }
        let successor_complete = snapshot
            .get(&successor)
            .unwrap_or_else(|| panic!("corrupted dependency graph: unknown txn {successor}"))
            .is_complete();
        let node = aux_graph
            .entry(successor)
            .or_insert_with(|| Node::new(successor_complete));
        node.redges.push(txn_id);
        if !node.visited {
            node.visited = true;
            stack.push((successor, 0));
        }
    }
}

/// Collects the component containing `root`; returns whether it is stable.
///
/// A component is stable when every member is complete and no transpose neighbor has
/// already been marked unstable. Members are tentatively marked stable; the caller
/// downgrades them when the verdict is unstable.
fn form_strongly_connected_component(
    root: TxnId,
    aux_graph: &mut HotMap<TxnId, Node>,
    component: &mut Vec<TxnId>,
) -> bool {
    let mut is_stable = true;
    let mut stack = vec![root];
    component.push(root);
    aux_graph
        .get_mut(&root)
        .unwrap_or_else(|| unreachable!("root comes from the auxiliary graph"))
        .comp_type = ComponentType::Stable;

    while let Some(txn_id) = stack.pop() {
        let (is_complete, redges) = {
            let node = aux_graph
                .get_mut(&txn_id)
                .unwrap_or_else(|| panic!("corrupted auxiliary graph: unknown node {txn_id}"));
            (node.is_complete, std::mem::take(&mut node.redges))
        };
        is_stable &= is_complete;
        for neighbor in redges {
            let node = aux_graph
                .get_mut(&neighbor)
                .unwrap_or_else(|| panic!("corrupted auxiliary graph: unknown node {neighbor}"));
            match node.comp_type {
                ComponentType::Unassigned => {
                    node.comp_type = ComponentType::Stable;
                    component.push(neighbor);
                    stack.push(neighbor);
                }
                ComponentType::Unstable => is_stable = false,
                ComponentType::Stable => {}
            }
        }
    }
    is_stable
}

struct Resolution {
    ready: Option<TxnId>,
    edges_removed: Vec<(TxnId, TxnId)>,
    edges_added: Vec<(TxnId, TxnId)>,
}

/// Rewrites one stable component of size >= 2 into the ascending-id path.
///
/// Every in-component edge is removed; each non-head member gains exactly one edge
/// toward its path successor. Every member has at least one in-component outbound
/// edge, so a slot for the replacement edge always exists.
fn resolve_deadlock(snapshot: &mut HotMap<TxnId, TxnInfo>, component: &mut Vec<TxnId>) -> Resolution {
    debug_assert!(component.len() >= 2);
    component.sort_unstable();

    let mut edges_removed = Vec::new();
    let mut edges_added = Vec::new();
    for i in (0..component.len()).rev() {
        let txn_id = component[i];
        let waited_by_len = {
            let info = snapshot
                .get(&txn_id)
                .unwrap_or_else(|| panic!("component contains unknown txn {txn_id}"));
            assert!(
                info.is_complete(),
                "stable component contains incomplete txn {txn_id}"
            );
            info.waited_by.len()
        };

        // The path tail gets no outgoing replacement edge.
        let mut new_edge_added = i == component.len() - 1;
        for slot in 0..waited_by_len {
            let successor = snapshot
                .get(&txn_id)
                .unwrap_or_else(|| panic!("component contains unknown txn {txn_id}"))
                .waited_by[slot];
            if successor == SENTINEL_TXN_ID || component.binary_search(&successor).is_err() {
                continue;
            }
            if new_edge_added {
                // Writing the sentinel removes this edge without shifting the list.
                set_waited_by_slot(snapshot, txn_id, slot, SENTINEL_TXN_ID);
            } else {
                let next_in_path = component[i + 1];
                set_waited_by_slot(snapshot, txn_id, slot, next_in_path);
                bump_waiting_for(snapshot, next_in_path, 1);
                edges_added.push((txn_id, next_in_path));
                new_edge_added = true;
            }
            bump_waiting_for(snapshot, successor, -1);
            edges_removed.push((txn_id, successor));
        }
        assert!(
            new_edge_added,
            "no waited-by slot available for the replacement edge of txn {txn_id}"
        );
    }

    let head = component[0];
    let ready = snapshot
        .get(&head)
        .unwrap_or_else(|| panic!("component head {head} is missing from the snapshot"))
        .is_ready()
        .then_some(head);
    Resolution {
        ready,
        edges_removed,
        edges_added,
    }
}

fn set_waited_by_slot(
    snapshot: &mut HotMap<TxnId, TxnInfo>,
    txn_id: TxnId,
    slot: usize,
    value: TxnId,
) {
    let info = snapshot
        .get_mut(&txn_id)
        .unwrap_or_else(|| panic!("component contains unknown txn {txn_id}"));
    info.waited_by[slot] = value;
}

fn bump_waiting_for(snapshot: &mut HotMap<TxnId, TxnInfo>, txn_id: TxnId, delta: i32) {
    let info = snapshot
        .get_mut(&txn_id)
        .unwrap_or_else(|| panic!("edge target {txn_id} is missing from the snapshot"));
    info.num_waiting_for += delta;
}

#[derive(Debug)]
enum ResolverCommand {
    RunOnce,
    Shutdown,
}

/// Owns the resolver thread; the command channel doubles as the loop timer.
#[derive(Debug)]
pub struct DeadlockResolverHandle {
    sender: mpsc::Sender<ResolverCommand>,
    worker: Option<JoinHandle<()>>,
}

impl DeadlockResolverHandle {
    /// Starts the resolver loop on its own named thread.
    #[must_use]
    pub(crate) fn spawn(resolver: DeadlockResolver, check_interval: Duration) -> Self {
        let (sender, receiver) = mpsc::channel::<ResolverCommand>();
        let worker = thread::Builder::new()
            .name("tern-deadlock-resolver".to_owned())
            .spawn(move || {
                loop {
                    match receiver.recv_timeout(check_interval) {
                        Err(mpsc::RecvTimeoutError::Timeout) | Ok(ResolverCommand::RunOnce) => {
                            let _ = resolver.run_once();
                        }
                        Ok(ResolverCommand::Shutdown)
                        | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .ok();
        Self { sender, worker }
    }

    /// Requests one extra pass ahead of the timer.
    pub fn trigger(&self) {
        let _ = self.sender.send(ResolverCommand::RunOnce);
    }

    /// Stops the loop and joins the thread.
    pub fn shutdown(&mut self) {
        let _ = self.sender.send(ResolverCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for DeadlockResolverHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
