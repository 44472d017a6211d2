/*!
 * Deadlock Detection
 *
 * Detection over the allocation grid and the arbiter's per-class queues:
 *
 * 1. `work = available`; a worker with no outstanding request is finished and
 *    its allocation returns to `work`.
 * 2. Each class queue is replayed in order. Its head is granted out of `work`
 *    only when it fits; nothing behind a blocked head moves.
 * 3. A worker whose last outstanding request was granted finishes and returns
 *    its whole allocation to `work`. Repeat until no queue advances.
 * 4. Whoever is still unfinished is deadlocked.
 */

use crate::core::types::{Instances, WorkerId};

/// Stateless detector over one consistent snapshot
pub struct DeadlockDetector;

impl DeadlockDetector {
    /// Deadlocked workers in ascending order, empty when the state is safe
    ///
    /// `allocation` is indexed `[worker][class]` and `available` by class.
    /// `queues[class]` lists `(worker, count)` in grant order, head first.
    pub fn detect(
        available: &[Instances],
        allocation: &[Vec<Instances>],
        queues: &[Vec<(WorkerId, Instances)>],
    ) -> Vec<WorkerId> {
        let workers = allocation.len();
        let mut work: Vec<u64> = available.iter().map(|&a| a as u64).collect();
        let mut held: Vec<Vec<u64>> = allocation
            .iter()
            .map(|row| row.iter().map(|&h| h as u64).collect())
            .collect();

        let mut outstanding = vec![0usize; workers];
        for &(worker, _) in queues.iter().flatten() {
            if let Some(slot) = outstanding.get_mut(worker) {
                *slot += 1;
            }
        }

        let mut finished = vec![false; workers];
        for worker in 0..workers {
            if outstanding[worker] == 0 {
                finish(worker, &mut finished, &mut held, &mut work);
            }
        }

        let mut heads = vec![0usize; queues.len()];
        loop {
            let mut progressed = false;
            for (class, queue) in queues.iter().enumerate() {
                while let Some(&(worker, count)) = queue.get(heads[class]) {
                    let free = work.get(class).copied().unwrap_or(0);
                    if count as u64 > free || worker >= workers {
                        break;
                    }
                    work[class] -= count as u64;
                    if let Some(slot) = held[worker].get_mut(class) {
                        *slot += count as u64;
                    }
                    heads[class] += 1;
                    progressed = true;

                    outstanding[worker] -= 1;
                    if outstanding[worker] == 0 {
                        finish(worker, &mut finished, &mut held, &mut work);
                    }
                }
            }
            if !progressed {
                break;
            }
        }

        finished
            .iter()
            .enumerate()
            .filter(|&(_, &done)| !done)
            .map(|(worker, _)| worker)
            .collect()
    }
}

fn finish(worker: WorkerId, finished: &mut [bool], held: &mut [Vec<u64>], work: &mut [u64]) {
    finished[worker] = true;
    for (slot, held) in work.iter_mut().zip(held[worker].iter_mut()) {
        *slot += *held;
        *held = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_idle_system_is_safe() {
        let deadlocked = DeadlockDetector::detect(&[1, 1], &[vec![0, 0], vec![0, 0]], &[]);
        assert!(deadlocked.is_empty());
    }

    #[test]
    fn test_two_worker_cycle() {
        // w0 holds A wants B, w1 holds B wants A
        let allocation = vec![vec![1, 0], vec![0, 1]];
        let queues = vec![vec![(1, 1)], vec![(0, 1)]];
        let deadlocked = DeadlockDetector::detect(&[0, 0], &allocation, &queues);
        assert_eq!(deadlocked, vec![0, 1]);
    }

    #[test]
    fn test_chain_resolves() {
        // w1 is not waiting, so it releases what w0 waits for
        let allocation = vec![vec![1, 0], vec![0, 1]];
        let queues = vec![vec![], vec![(0, 1)]];
        let deadlocked = DeadlockDetector::detect(&[0, 0], &allocation, &queues);
        assert!(deadlocked.is_empty());
    }

    #[test]
    fn test_bystander_not_reported() {
        // w0/w1 deadlock; w2 holds nothing and waits for nothing
        let allocation = vec![vec![1, 0], vec![0, 1], vec![0, 0]];
        let queues = vec![vec![(1, 1)], vec![(0, 1)]];
        let deadlocked = DeadlockDetector::detect(&[0, 0], &allocation, &queues);
        assert_eq!(deadlocked, vec![0, 1]);
    }

    #[test]
    fn test_waiting_on_itself() {
        // Class total 2: w0 holds 1 and asks for 2 more
        let deadlocked = DeadlockDetector::detect(&[1], &[vec![1]], &[vec![(0, 2)]]);
        assert_eq!(deadlocked, vec![0]);
    }

    #[test]
    fn test_blocked_head_holds_back_fitting_request() {
        // A total 2, B total 1. w1 heads the A queue wanting 2; w2 behind it
        // wants 1 which would fit, but never moves past the head.
        let allocation = vec![vec![1, 0], vec![0, 0], vec![0, 1]];
        let queues = vec![vec![(1, 2), (2, 1)], vec![(0, 1)]];
        let deadlocked = DeadlockDetector::detect(&[1, 0], &allocation, &queues);
        assert_eq!(deadlocked, vec![0, 1, 2]);
    }

    #[test]
    fn test_queue_drains_in_order() {
        // Head fits, then its owner finishes and frees enough for the next
        let allocation = vec![vec![1], vec![0]];
        let queues = vec![vec![(0, 1), (1, 2)]];
        let deadlocked = DeadlockDetector::detect(&[1], &allocation, &queues);
        assert!(deadlocked.is_empty());
    }

    #[test]
    fn test_queued_worker_holding_nothing_is_not_finished_upfront() {
        // w1 holds nothing and heads the A queue; w0 holds A and waits on B;
        // w2 holds B and waits on A behind w1
        let allocation = vec![vec![1, 0], vec![0, 0], vec![0, 1]];
        let queues = vec![vec![(1, 1), (2, 1)], vec![(0, 1)]];
        let deadlocked = DeadlockDetector::detect(&[0, 0], &allocation, &queues);
        assert_eq!(deadlocked, vec![0, 1, 2]);
    }
}
