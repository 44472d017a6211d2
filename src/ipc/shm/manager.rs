/*!
 * Shared Memory Namespace
 * Keyed registry of shared regions, the stand-in for SysV shm keys
 */

use super::segment::SharedSegment;
use super::traits::SharedRegion;
use super::types::{ShmError, ShmStats};
use crate::core::limits::MAX_SHARED_REGIONS;
use crate::core::sync::{LockOwner, SyncConfig};
use crate::core::types::{IpcKey, Pid};
use ahash::RandomState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Namespace of shared regions
///
/// Every participant that should see the same regions holds a clone of the
/// same `Arc<ShmNamespace>`; nothing is process-global.
pub struct ShmNamespace {
    regions: DashMap<IpcKey, Arc<dyn SharedRegion>, RandomState>,
    count: AtomicUsize,
    max_regions: usize,
}

impl ShmNamespace {
    pub fn new() -> Self {
        Self::with_limit(MAX_SHARED_REGIONS)
    }

    pub fn with_limit(max_regions: usize) -> Self {
        Self {
            regions: DashMap::with_hasher(RandomState::new()),
            count: AtomicUsize::new(0),
            max_regions,
        }
    }

    /// Create a region under `key` and attach the creator to it
    pub fn create<T: Send + Sync + 'static>(
        &self,
        key: IpcKey,
        owner_pid: Pid,
        config: SyncConfig,
        data: T,
    ) -> Result<(Arc<SharedSegment<T>>, LockOwner), ShmError> {
        // Reserve a slot before touching the map; DashMap::len() under an
        // entry guard would deadlock on the held shard.
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_regions).then_some(n + 1)
            })
            .map_err(|n| ShmError::LimitExceeded(n, self.max_regions))?;

        match self.regions.entry(key) {
            Entry::Occupied(_) => {
                self.count.fetch_sub(1, Ordering::AcqRel);
                Err(ShmError::AlreadyExists(key))
            }
            Entry::Vacant(slot) => {
                let segment = Arc::new(SharedSegment::new(key, owner_pid, config, data));
                let owner = segment.register_attachment(owner_pid);
                slot.insert(segment.clone());

                info!(
                    key = format_args!("0x{:08x}", key),
                    owner_pid,
                    kind = std::any::type_name::<T>(),
                    "Created shared region"
                );
                Ok((segment, owner))
            }
        }
    }

    /// Attach to an existing region under `key`
    pub fn attach<T: Send + Sync + 'static>(
        &self,
        key: IpcKey,
        pid: Pid,
    ) -> Result<(Arc<SharedSegment<T>>, LockOwner), ShmError> {
        let region = self
            .regions
            .get(&key)
            .map(|r| r.value().clone())
            .ok_or(ShmError::NotFound(key))?;
        let found = region.kind();

        let segment = region
            .into_any()
            .downcast::<SharedSegment<T>>()
            .map_err(|_| ShmError::TypeMismatch {
                key,
                expected: std::any::type_name::<T>().to_string(),
                found: found.to_string(),
            })?;
        let owner = segment.register_attachment(pid);

        debug!(key = format_args!("0x{:08x}", key), pid, "Attached to shared region");
        Ok((segment, owner))
    }

    /// Remove the region under `key`
    ///
    /// Existing attachments keep their handle (like `IPC_RMID`); new
    /// attaches fail with `NotFound`.
    pub fn remove(&self, key: IpcKey, pid: Pid) -> Result<(), ShmError> {
        let owner_pid = self
            .regions
            .get(&key)
            .map(|r| r.owner_pid())
            .ok_or(ShmError::NotFound(key))?;
        if owner_pid != pid {
            return Err(ShmError::PermissionDenied(format!(
                "pid {} cannot remove region 0x{:08x} owned by pid {}",
                pid, key, owner_pid
            )));
        }

        if let Some((_, region)) = self.regions.remove(&key) {
            region.mark_removed();
            self.count.fetch_sub(1, Ordering::AcqRel);
            info!(
                key = format_args!("0x{:08x}", key),
                attached = region.attached(),
                "Removed shared region"
            );
        }
        Ok(())
    }

    pub fn contains(&self, key: IpcKey) -> bool {
        self.regions.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Vec<ShmStats> {
        let mut stats: Vec<ShmStats> = self
            .regions
            .iter()
            .map(|r| ShmStats {
                key: *r.key(),
                kind: r.kind().to_string(),
                owner_pid: r.owner_pid(),
                attached: r.attached(),
            })
            .collect();
        stats.sort_by_key(|s| s.key);
        stats
    }
}

impl Default for ShmNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShmNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmNamespace")
            .field("regions", &self.len())
            .field("max_regions", &self.max_regions)
            .finish()
    }
}
