//! Per-recipient FIFO queues, drained atomically on fetch.
//!
//! One lock guards every queue. `deposit` and the drains each hold it for
//! their whole operation, so a deposit racing a drain lands in exactly one
//! of: the drained batch, or the queue the next drain sees.
//!
//! Each entry remembers its encoded size so a drain can stop at a byte
//! budget and leave the rest queued.
//!
//! Queues are unbounded and volatile.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, PoisonError},
};

use cipherpost_proto::MailboxEntry;

#[derive(Debug)]
struct Queued {
    entry: MailboxEntry,
    cost: usize,
}

impl Queued {
    fn new(entry: MailboxEntry) -> Self {
        let cost = entry.batch_cost();
        Self { entry, cost }
    }
}

/// Pending entries for every recipient.
#[derive(Debug, Default)]
pub struct Mailbox {
    queues: Mutex<HashMap<String, VecDeque<Queued>>>,
}

impl Mailbox {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` to `recipient`'s queue, creating it if absent.
    pub fn deposit(&self, recipient: &str, entry: MailboxEntry) {
        let queued = Queued::new(entry);
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(recipient.to_string())
            .or_default()
            .push_back(queued);
    }

    /// Append one entry per recipient under a single lock acquisition.
    ///
    /// A concurrent drain of any of these recipients sees all of the batch
    /// or none of it.
    pub fn deposit_many<'a, I>(&self, recipients: I, entry: &MailboxEntry) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let cost = entry.batch_cost();
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);

        let mut count = 0;
        for recipient in recipients {
            queues
                .entry(recipient.to_string())
                .or_default()
                .push_back(Queued { entry: entry.clone(), cost });
            count += 1;
        }
        count
    }

    /// Remove and return everything queued for `recipient`, oldest first.
    pub fn take_all(&self, recipient: &str) -> Vec<MailboxEntry> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(recipient)
            .map(|queue| queue.into_iter().map(|queued| queued.entry).collect())
            .unwrap_or_default()
    }

    /// Remove the oldest entries for `recipient` whose combined
    /// [`batch_cost`](MailboxEntry::batch_cost) stays within `budget`.
    ///
    /// Whatever does not fit stays queued, in order, for the next drain. An
    /// entry larger than `budget` on its own is returned alone so a queue
    /// can never wedge; callers keep such entries out at deposit time.
    pub fn take_up_to(&self, recipient: &str, budget: usize) -> Vec<MailboxEntry> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(queue) = queues.get_mut(recipient) else {
            return Vec::new();
        };

        let mut used = 0usize;
        let mut batch = Vec::new();
        while let Some(front) = queue.front() {
            let next = used.saturating_add(front.cost);
            if next > budget && !batch.is_empty() {
                break;
            }
            used = next;
            if let Some(queued) = queue.pop_front() {
                batch.push(queued.entry);
            }
        }

        if queue.is_empty() {
            queues.remove(recipient);
        }
        batch
    }

    /// Number of entries waiting for `recipient`.
    pub fn pending(&self, recipient: &str) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(recipient)
            .map_or(0, VecDeque::len)
    }

    /// Number of entries waiting across all recipients.
    pub fn total_pending(&self) -> usize {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner).values().map(VecDeque::len).sum()
    }
}
