//! Typed request/response envelopes exchanged between modules.

use tern_common::ids::{MachineId, SlotId};

use crate::txn::Transaction;

/// One internal message together with its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Machine the message originated from.
    pub from: MachineId,
    /// Typed payload.
    pub request: Request,
}

/// Requests the scheduler consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// A sequenced transaction: single-home, a multi-home coordinator copy, or a
    /// lock-only fragment. `slot` is the position inside its origin stream.
    ForwardTxn {
        /// The transaction payload.
        txn: Box<Transaction>,
        /// Position assigned by the origin stream's sequencer.
        slot: SlotId,
    },
    /// Latency probe; answered with a pong without touching the lock manager.
    Ping {
        /// Sender-side send timestamp, nanoseconds since the epoch.
        src_send_time: i64,
        /// Opaque destination tag echoed back to the sender.
        dst: MachineId,
    },
    /// Wake-up from the deadlock resolver: newly-ready transactions are waiting.
    Signal,
    /// Metrics/lock-table dump request.
    Stats {
        /// Verbosity level; higher levels include per-transaction and per-key detail.
        level: u32,
    },
}

/// Responses the scheduler produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Reply to a [`Request::Ping`].
    Pong {
        /// Echoed sender-side send timestamp.
        src_send_time: i64,
        /// Windowed average deviation observed by the receiver, nanoseconds.
        dev: i64,
        /// Echoed destination tag.
        dst: MachineId,
    },
    /// Serialized stats snapshot.
    Stats {
        /// JSON-rendered snapshot.
        json: String,
    },
    /// A transaction that finished execution and released its locks.
    Completed {
        /// The executed transaction, with status and read values filled in.
        txn: Box<Transaction>,
    },
}
