//! Pending status updates awaiting master acknowledgement.
//!
//! Delivery is at-least-once: every update relayed to the master is parked
//! in a deadline bucket and re-sent until a `StatusUpdateAck` for its task
//! arrives. Re-sent updates move to a fresh bucket, so an unacknowledged
//! task costs one pending entry per outstanding update rather than growing
//! a new bucket every retry interval.

use std::collections::BTreeMap;
use std::time::Instant;

use armada_id::TaskId;

use crate::protocol::StatusUpdate;

/// Status updates keyed by retry deadline, then by task id within a bucket.
#[derive(Debug, Default)]
pub struct PendingUpdates {
    buckets: BTreeMap<Instant, BTreeMap<TaskId, StatusUpdate>>,
}

impl PendingUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks an update for retry at `deadline`.
    ///
    /// Within one bucket the latest update for a task wins; updates for the
    /// same task parked under different deadlines are distinct observations
    /// and each awaits its own acknowledgement.
    pub fn insert(&mut self, deadline: Instant, update: StatusUpdate) {
        self.buckets
            .entry(deadline)
            .or_default()
            .insert(update.status.task_id.clone(), update);
    }

    /// Retires the first pending update for `task_id`, scanning buckets in
    /// deadline order. Returns whether anything was erased; an acknowledgement
    /// for an unknown task is a no-op.
    pub fn acknowledge(&mut self, task_id: &TaskId) -> bool {
        let mut emptied = None;
        let mut found = false;

        for (deadline, bucket) in self.buckets.iter_mut() {
            if bucket.remove(task_id).is_some() {
                found = true;
                if bucket.is_empty() {
                    emptied = Some(*deadline);
                }
                break;
            }
        }

        if let Some(deadline) = emptied {
            self.buckets.remove(&deadline);
        }

        found
    }

    /// Removes every bucket whose deadline has passed and returns its
    /// updates, oldest deadline first. The caller re-sends them and parks
    /// survivors under a fresh deadline.
    pub fn drain_due(&mut self, now: Instant) -> Vec<StatusUpdate> {
        let mut due = Vec::new();
        let remaining = self
            .buckets
            .split_off(&(now + std::time::Duration::from_nanos(1)));

        for (_, bucket) in std::mem::replace(&mut self.buckets, remaining) {
            due.extend(bucket.into_values());
        }

        due
    }

    /// Number of pending updates across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.values().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
