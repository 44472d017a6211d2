/*!
 * Resource Table
 * Per-class availability and the worker x class allocation grid
 */

use super::types::{ReclaimReport, ResourceError, ResourceResult, TableSpec};
use crate::core::types::{ClassId, Instances, WorkerId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Shared resource table
///
/// Mutating methods must only be called while holding the lock of the
/// region that contains the table; that lock is what makes every grant,
/// release and reclaim a single atomic step and preserves
/// `available + sum(held) == total` for each class. Single-cell reads are
/// safe without it.
#[derive(Debug)]
pub struct ResourceTable {
    totals: Box<[Instances]>,
    available: Box<[AtomicU32]>,
    /// Row-major: `held[worker * class_count + class]`
    held: Box<[AtomicU32]>,
    max_workers: usize,
}

impl ResourceTable {
    /// A table with every class at full availability
    pub fn new(spec: &TableSpec) -> Self {
        let class_count = spec.class_count();
        Self {
            totals: spec.totals.clone().into_boxed_slice(),
            available: spec.totals.iter().map(|&t| AtomicU32::new(t)).collect(),
            held: (0..spec.max_workers * class_count)
                .map(|_| AtomicU32::new(0))
                .collect(),
            max_workers: spec.max_workers,
        }
    }

    pub fn class_count(&self) -> usize {
        self.totals.len()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn totals(&self) -> &[Instances] {
        &self.totals
    }

    pub fn total(&self, class: ClassId) -> Option<Instances> {
        self.totals.get(class).copied()
    }

    pub fn available(&self, class: ClassId) -> Instances {
        self.available
            .get(class)
            .map_or(0, |a| a.load(Ordering::Acquire))
    }

    pub fn held(&self, worker: WorkerId, class: ClassId) -> Instances {
        self.cell(worker, class)
            .map_or(0, |c| c.load(Ordering::Acquire))
    }

    /// Everything `worker` holds, indexed by class
    pub fn held_by(&self, worker: WorkerId) -> Vec<Instances> {
        (0..self.class_count())
            .map(|class| self.held(worker, class))
            .collect()
    }

    fn cell(&self, worker: WorkerId, class: ClassId) -> Option<&AtomicU32> {
        if worker >= self.max_workers || class >= self.class_count() {
            return None;
        }
        self.held.get(worker * self.class_count() + class)
    }

    /// Check that a request could ever be granted
    pub fn validate_request(
        &self,
        worker: WorkerId,
        class: ClassId,
        count: Instances,
    ) -> ResourceResult<()> {
        self.validate_target(worker, class)?;
        let total = self.totals[class];
        if count == 0 || count > total {
            return Err(ResourceError::InvalidRequest(format!(
                "count {} outside 1..={} for class {}",
                count, total, class
            )));
        }
        Ok(())
    }

    pub fn validate_target(&self, worker: WorkerId, class: ClassId) -> ResourceResult<()> {
        if worker >= self.max_workers {
            return Err(ResourceError::InvalidRequest(format!(
                "worker {} outside 0..{}",
                worker, self.max_workers
            )));
        }
        if class >= self.class_count() {
            return Err(ResourceError::InvalidRequest(format!(
                "class {} outside 0..{}",
                class,
                self.class_count()
            )));
        }
        Ok(())
    }

    /// Move `count` instances from the pool to `worker` if enough are free
    pub(super) fn try_grant(&self, worker: WorkerId, class: ClassId, count: Instances) -> bool {
        let (Some(available), Some(cell)) = (self.available.get(class), self.cell(worker, class))
        else {
            return false;
        };
        let free = available.load(Ordering::Acquire);
        if free < count {
            return false;
        }
        available.store(free - count, Ordering::Release);
        cell.fetch_add(count, Ordering::AcqRel);
        true
    }

    /// Return `count` instances from `worker` to the pool
    ///
    /// Fails without touching the table when `count` exceeds what is held.
    pub(super) fn release(
        &self,
        worker: WorkerId,
        class: ClassId,
        count: Instances,
    ) -> ResourceResult<()> {
        self.validate_target(worker, class)?;
        let cell = &self.held[worker * self.class_count() + class];
        let held = cell.load(Ordering::Acquire);
        if count > held {
            return Err(ResourceError::InvalidRelease {
                worker,
                class,
                requested: count,
                held,
            });
        }
        cell.store(held - count, Ordering::Release);
        self.available[class].fetch_add(count, Ordering::AcqRel);
        Ok(())
    }

    /// Return everything `worker` holds
    pub(super) fn reclaim(&self, worker: WorkerId) -> ReclaimReport {
        let mut report = ReclaimReport {
            worker,
            ..Default::default()
        };
        for class in 0..self.class_count() {
            let Some(cell) = self.cell(worker, class) else {
                break;
            };
            let held = cell.swap(0, Ordering::AcqRel);
            if held > 0 {
                self.available[class].fetch_add(held, Ordering::AcqRel);
                report.released.push((class, held));
            }
        }
        report
    }

    /// First class whose conservation invariant does not hold
    pub fn find_imbalance(&self) -> Option<ClassId> {
        (0..self.class_count()).find(|&class| {
            let held: u64 = (0..self.max_workers)
                .map(|w| self.held(w, class) as u64)
                .sum();
            self.available(class) as u64 + held != self.totals[class] as u64
        })
    }

    /// Copy of the table in its fixed binary layout
    pub fn layout(&self) -> TableLayout {
        TableLayout {
            class_count: self.class_count() as u32,
            classes: (0..self.class_count())
                .map(|class| ClassDescriptor {
                    total: self.totals[class],
                    available: self.available(class),
                })
                .collect(),
            max_workers: self.max_workers as u32,
            grid: self.held.iter().map(|c| c.load(Ordering::Acquire)).collect(),
        }
    }
}

/// `(total, available)` of one class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub total: Instances,
    pub available: Instances,
}

/// Fixed binary layout of the resource table
///
/// Encoded with bincode's default fixint little-endian format; for a given
/// class count and worker count the size is always `encoded_len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLayout {
    pub class_count: u32,
    pub classes: Vec<ClassDescriptor>,
    pub max_workers: u32,
    /// Row-major worker x class allocation grid
    pub grid: Vec<Instances>,
}

impl TableLayout {
    /// Encoded size for a table of the given shape
    pub const fn encoded_len(class_count: usize, max_workers: usize) -> usize {
        // u32 count + u64 vec length + pairs, u32 rows + u64 vec length + grid
        4 + 8 + class_count * 8 + 4 + 8 + class_count * max_workers * 4
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        bincode::serialize(self).map_err(|e| format!("Failed to encode table layout: {}", e))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let layout: Self = bincode::deserialize(bytes)
            .map_err(|e| format!("Failed to decode table layout: {}", e))?;
        let classes = layout.class_count as usize;
        if layout.classes.len() != classes
            || layout.grid.len() != classes * layout.max_workers as usize
        {
            return Err("Table layout dimensions do not match its header".to_string());
        }
        Ok(layout)
    }

    pub fn held(&self, worker: WorkerId, class: ClassId) -> Instances {
        self.grid
            .get(worker * self.class_count as usize + class)
            .copied()
            .unwrap_or(0)
    }

    pub fn available(&self, class: ClassId) -> Instances {
        self.classes.get(class).map_or(0, |c| c.available)
    }

    /// `available + sum(held) == total` for every class
    pub fn is_conserved(&self) -> bool {
        self.classes.iter().enumerate().all(|(class, desc)| {
            let held: u64 = (0..self.max_workers as usize)
                .map(|w| self.held(w, class) as u64)
                .sum();
            desc.available as u64 + held == desc.total as u64
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table() -> ResourceTable {
        ResourceTable::new(&TableSpec::new(vec![3, 5], 4))
    }

    #[test]
    fn test_new_table_is_full() {
        let t = table();
        assert_eq!(t.available(0), 3);
        assert_eq!(t.available(1), 5);
        assert_eq!(t.held_by(2), vec![0, 0]);
        assert_eq!(t.find_imbalance(), None);
    }

    #[test]
    fn test_grant_and_release() {
        let t = table();
        assert!(t.try_grant(1, 0, 2));
        assert!(!t.try_grant(2, 0, 2));
        assert_eq!(t.available(0), 1);
        assert_eq!(t.held(1, 0), 2);

        t.release(1, 0, 1).unwrap();
        assert_eq!(t.available(0), 2);
        assert_eq!(t.held(1, 0), 1);
        assert_eq!(t.find_imbalance(), None);
    }

    #[test]
    fn test_over_release_leaves_table_unchanged() {
        let t = table();
        assert!(t.try_grant(0, 1, 2));
        let before = t.layout();

        let err = t.release(0, 1, 3).unwrap_err();
        assert_eq!(
            err,
            ResourceError::InvalidRelease {
                worker: 0,
                class: 1,
                requested: 3,
                held: 2
            }
        );
        assert_eq!(t.layout(), before);
    }

    #[test]
    fn test_reclaim_twice() {
        let t = table();
        assert!(t.try_grant(3, 0, 1));
        assert!(t.try_grant(3, 1, 4));

        let first = t.reclaim(3);
        assert_eq!(first.released, vec![(0, 1), (1, 4)]);
        assert_eq!(first.instances(), 5);

        let second = t.reclaim(3);
        assert!(second.released.is_empty());
        assert_eq!(t.available(1), 5);
    }

    #[test]
    fn test_validate_request() {
        let t = table();
        assert!(t.validate_request(0, 0, 3).is_ok());
        assert!(t.validate_request(0, 0, 4).is_err());
        assert!(t.validate_request(0, 0, 0).is_err());
        assert!(t.validate_request(4, 0, 1).is_err());
        assert!(t.validate_request(0, 2, 1).is_err());
    }

    #[test]
    fn test_layout_encoding_is_fixed_size() {
        let t = table();
        assert!(t.try_grant(2, 1, 3));
        let layout = t.layout();
        let bytes = layout.to_bytes().unwrap();
        assert_eq!(bytes.len(), TableLayout::encoded_len(2, 4));

        let decoded = TableLayout::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.held(2, 1), 3);
        assert_eq!(decoded.available(1), 2);
        assert!(decoded.is_conserved());
    }
}
