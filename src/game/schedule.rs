//! Scheduled Tasks
//!
//! Deferred work (chain detonations, explosion expiry) queued against
//! wall-clock deadlines and drained once per tick. Cancelling the queue on
//! room teardown drops everything still pending.

use std::collections::BTreeMap;

use crate::game::state::{BombId, ExplosionId};

/// Work that can be deferred.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScheduledTask {
    /// Detonate a bomb early (chain reaction)
    Detonate(BombId),
    /// Remove an explosion from display
    ClearExplosion(ExplosionId),
}

/// Handle for cancelling a single task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle {
    due_ms: u64,
    seq: u64,
}

/// Deadline-ordered task queue. Ties run in scheduling order.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: BTreeMap<TaskHandle, ScheduledTask>,
    next_seq: u64,
}

impl TaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to run at or after `due_ms`.
    pub fn schedule(&mut self, due_ms: u64, task: ScheduledTask) -> TaskHandle {
        let handle = TaskHandle { due_ms, seq: self.next_seq };
        self.next_seq += 1;
        self.tasks.insert(handle, task);
        handle
    }

    /// Cancel one task. Returns false if it already ran or was cancelled.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        self.tasks.remove(&handle).is_some()
    }

    /// Drop every pending task. Returns how many were dropped.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.tasks.len();
        self.tasks.clear();
        n
    }

    /// Remove and return every task due at `now_ms`, in deadline order.
    pub fn drain_due(&mut self, now_ms: u64) -> Vec<ScheduledTask> {
        let split = TaskHandle { due_ms: now_ms.saturating_add(1), seq: 0 };
        let later = self.tasks.split_off(&split);
        let due = std::mem::replace(&mut self.tasks, later);
        due.into_values().collect()
    }

    /// Is a detonation already queued for this bomb?
    pub fn has_detonation(&self, bomb_id: &BombId) -> bool {
        self.tasks
            .values()
            .any(|t| matches!(t, ScheduledTask::Detonate(id) if id == bomb_id))
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// No pending tasks?
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
