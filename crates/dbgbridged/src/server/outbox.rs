//! Per-connection FIFO of messages waiting to be written.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::protocol::Outbound;

#[derive(Debug, Default)]
pub(crate) struct Outbox {
    queue: Mutex<VecDeque<Outbound>>,
    ready: Condvar,
}

impl Outbox {
    pub(crate) fn push(&self, message: Outbound) {
        self.lock().push_back(message);
        self.ready.notify_one();
    }

    /// Pops the oldest message, waiting up to `wait` for one to arrive.
    ///
    /// Returns early with `None` when woken without a message.
    pub(crate) fn pop_timeout(&self, wait: Duration) -> Option<Outbound> {
        let mut queue = self.lock();
        if queue.is_empty() {
            queue = self
                .ready
                .wait_timeout(queue, wait)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        queue.pop_front()
    }

    /// Takes everything queued, oldest first.
    pub(crate) fn drain(&self) -> Vec<Outbound> {
        self.lock().drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Wakes a worker blocked in [`Outbox::pop_timeout`].
    pub(crate) fn wake(&self) {
        self.ready.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Outbound>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
