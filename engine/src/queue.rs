//! Replay ordering for the pending operation queue.
//!
//! A sync cycle works on a snapshot of the queue:
//!
//! 1. Sort by priority tier, then `createdAt`, then ID.
//! 2. Operations on the same entity keep the slots they were given, but are
//!    re-seated inside those slots in creation order, so a later low-priority
//!    edit can never be replayed before an earlier one on the same entity.
//! 3. While the cycle runs, an entity whose operation stays queued is held,
//!    and every later operation on it is skipped until the next cycle.

use crate::{Backoff, PendingOperation, Timestamp};
use std::collections::{HashMap, HashSet, VecDeque};

/// Order a queue snapshot for replay. Deterministic for any input order.
pub fn replay_order(mut ops: Vec<PendingOperation>) -> Vec<PendingOperation> {
    ops.sort_by(|a, b| {
        (a.priority, a.created_at, &a.id).cmp(&(b.priority, b.created_at, &b.id))
    });

    let mut slots: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, op) in ops.iter().enumerate() {
        slots.entry(op.entity_key()).or_default().push(idx);
    }

    let mut seats: Vec<Option<PendingOperation>> = ops.into_iter().map(Some).collect();
    let mut ordered: Vec<Option<PendingOperation>> = vec![None; seats.len()];

    for positions in slots.into_values() {
        let mut group: Vec<PendingOperation> =
            positions.iter().filter_map(|&i| seats[i].take()).collect();
        group.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        for (pos, op) in positions.into_iter().zip(group) {
            ordered[pos] = Some(op);
        }
    }

    ordered.into_iter().flatten().collect()
}

/// Why an operation was passed over in this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Still inside its backoff window
    Backoff,
    /// An earlier operation on the same entity stayed queued
    EntityHeld,
}

/// The next thing the sync loop should do.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Dispatch(PendingOperation),
    Skip {
        op: PendingOperation,
        reason: SkipReason,
    },
}

/// One cycle's worth of ordered operations.
#[derive(Debug)]
pub struct ReplayPlan {
    queue: VecDeque<PendingOperation>,
    total: usize,
    held: HashSet<String>,
}

impl ReplayPlan {
    /// Build a plan from an unordered queue snapshot.
    pub fn new(ops: Vec<PendingOperation>) -> Self {
        let queue: VecDeque<_> = replay_order(ops).into();
        Self {
            total: queue.len(),
            queue,
            held: HashSet::new(),
        }
    }

    /// Number of operations in the snapshot.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Operations not yet handed out.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Hold an entity for the rest of the cycle.
    pub fn hold(&mut self, entity_key: impl Into<String>) {
        self.held.insert(entity_key.into());
    }

    pub fn is_held(&self, entity_key: &str) -> bool {
        self.held.contains(entity_key)
    }

    /// Hand out the next operation, deciding whether it may be dispatched.
    ///
    /// An operation skipped for backoff holds its entity, so later
    /// operations on that entity are skipped too.
    pub fn next_step(&mut self, now: Timestamp, backoff: &Backoff) -> Option<Step> {
        let op = self.queue.pop_front()?;
        let entity = op.entity_key();

        if self.held.contains(&entity) {
            return Some(Step::Skip {
                op,
                reason: SkipReason::EntityHeld,
            });
        }

        if !op.is_due(now, backoff) {
            self.held.insert(entity);
            return Some(Step::Skip {
                op,
                reason: SkipReason::Backoff,
            });
        }

        Some(Step::Dispatch(op))
    }
}
