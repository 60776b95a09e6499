//! Gap-intolerant ordered log consumer.

use std::collections::HashMap;

use crate::error::{TernError, TernResult};
use crate::ids::SlotId;

/// A log of items numbered consecutively in increasing order.
///
/// Items can be inserted in any order but are read strictly one-by-one following their
/// number: when the item right after the most recently read one has not arrived yet,
/// reading cannot advance. The caller polls [`AsyncLog::has_next`] rather than blocking.
#[derive(Debug, Clone, Default)]
pub struct AsyncLog<T> {
    entries: HashMap<SlotId, T>,
    next: SlotId,
}

impl<T> AsyncLog<T> {
    /// Creates a log whose first readable position is `start_from`.
    #[must_use]
    pub fn new(start_from: SlotId) -> Self {
        Self {
            entries: HashMap::new(),
            next: start_from,
        }
    }

    /// Inserts one item at `position`.
    ///
    /// Positions below the read cursor are late or duplicate deliveries and are
    /// silently dropped; they carry no information once the stream has advanced.
    ///
    /// # Errors
    ///
    /// Returns `TernError::DuplicateLogPosition` when the position is already occupied.
    pub fn insert(&mut self, position: SlotId, item: T) -> TernResult<()> {
        if position < self.next {
            return Ok(());
        }
        if self.entries.contains_key(&position) {
            return Err(TernError::DuplicateLogPosition(position));
        }
        let _ = self.entries.insert(position, item);
        Ok(())
    }

    /// Returns whether the item at the read cursor has arrived.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.entries.contains_key(&self.next)
    }

    /// Returns the item at the read cursor without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.entries.get(&self.next)
    }

    /// Consumes and returns the item at the read cursor, advancing the cursor by one.
    ///
    /// # Errors
    ///
    /// Returns `TernError::NoNextLogEntry` when the next position has not arrived.
    pub fn next(&mut self) -> TernResult<(SlotId, T)> {
        let position = self.next;
        let Some(item) = self.entries.remove(&position) else {
            return Err(TernError::NoNextLogEntry);
        };
        self.next += 1;
        Ok((position, item))
    }
}
