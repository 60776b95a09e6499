//! Per-partition scheduling: the DDR lock manager, its deadlock resolver, and the
//! worker pool that executes ready transactions.

pub mod lock_manager;
pub mod lock_queue;
pub mod resolver;
pub mod scheduler;
pub mod worker;

pub use lock_manager::{AcquireLocksResult, DdrLockManager};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerInput};
