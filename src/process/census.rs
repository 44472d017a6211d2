/*!
 * Process Census
 * Supervisor-side bookkeeping of live workers and their slots
 */

use crate::core::limits::FIRST_WORKER_PID;
use crate::core::types::{Pid, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Live workers, free slots and lifetime counters
///
/// A slot is a `WorkerId`, i.e. a row of the resource table. Slots are handed
/// out lowest first and only come back after the supervisor has reclaimed
/// the previous occupant's resources. PIDs are never reused.
#[derive(Debug, Clone)]
pub struct ProcessCensus {
    free_slots: BTreeSet<WorkerId>,
    live: HashMap<WorkerId, Pid>,
    next_pid: Pid,
    last_dead: Option<Pid>,
    spawned: u64,
    terminated: u64,
}

impl ProcessCensus {
    pub fn new(max_workers: usize) -> Self {
        Self {
            free_slots: (0..max_workers).collect(),
            live: HashMap::with_capacity(max_workers),
            next_pid: FIRST_WORKER_PID,
            last_dead: None,
            spawned: 0,
            terminated: 0,
        }
    }

    /// Reserve a slot and a fresh PID, `None` when every slot is taken
    pub fn admit(&mut self) -> Option<(WorkerId, Pid)> {
        let worker = self.free_slots.pop_first()?;
        let pid = self.next_pid;
        self.next_pid += 1;
        self.live.insert(worker, pid);
        self.spawned += 1;
        Some((worker, pid))
    }

    /// Give back a slot whose worker never started
    pub fn abort(&mut self, worker: WorkerId) {
        if self.live.remove(&worker).is_some() {
            self.free_slots.insert(worker);
            self.spawned -= 1;
        }
    }

    /// Record a death; returns false if the slot was not live
    pub fn retire(&mut self, worker: WorkerId, pid: Pid) -> bool {
        match self.live.get(&worker) {
            Some(&live_pid) if live_pid == pid => {
                self.live.remove(&worker);
                self.free_slots.insert(worker);
                self.last_dead = Some(pid);
                self.terminated += 1;
                true
            }
            _ => false,
        }
    }

    pub fn active(&self) -> usize {
        self.live.len()
    }

    pub fn is_full(&self) -> bool {
        self.free_slots.is_empty()
    }

    pub fn pid_of(&self, worker: WorkerId) -> Option<Pid> {
        self.live.get(&worker).copied()
    }

    /// PID of the most recently terminated worker
    pub fn last_dead(&self) -> Option<Pid> {
        self.last_dead
    }

    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    pub fn terminated(&self) -> u64 {
        self.terminated
    }

    pub fn snapshot(&self) -> CensusSnapshot {
        CensusSnapshot {
            active: self.active(),
            last_dead: self.last_dead,
            spawned: self.spawned,
            terminated: self.terminated,
        }
    }
}

/// Serializable census counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CensusSnapshot {
    pub active: usize,
    pub last_dead: Option<Pid>,
    pub spawned: u64,
    pub terminated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_slots_fill_lowest_first() {
        let mut census = ProcessCensus::new(2);
        assert_eq!(census.admit(), Some((0, FIRST_WORKER_PID)));
        assert_eq!(census.admit(), Some((1, FIRST_WORKER_PID + 1)));
        assert!(census.is_full());
        assert_eq!(census.admit(), None);
    }

    #[test]
    fn test_retire_recycles_slot_not_pid() {
        let mut census = ProcessCensus::new(2);
        let (w0, p0) = census.admit().unwrap();
        census.admit().unwrap();

        assert!(census.retire(w0, p0));
        assert_eq!(census.last_dead(), Some(p0));
        assert_eq!(census.admit(), Some((0, FIRST_WORKER_PID + 2)));
    }

    #[test]
    fn test_stale_retire_ignored() {
        let mut census = ProcessCensus::new(1);
        let (w, p) = census.admit().unwrap();
        assert!(!census.retire(w, p + 1));
        assert!(census.retire(w, p));
        assert!(!census.retire(w, p));

        assert_eq!(
            census.snapshot(),
            CensusSnapshot {
                active: 0,
                last_dead: Some(p),
                spawned: 1,
                terminated: 1
            }
        );
    }

    #[test]
    fn test_abort_returns_slot() {
        let mut census = ProcessCensus::new(1);
        let (w, _) = census.admit().unwrap();
        census.abort(w);
        assert_eq!(census.spawned(), 0);
        assert!(!census.is_full());
    }
}
