/*!
 * Shared Memory Segment
 * One shared region: a payload plus the lock that guards it
 */

use crate::core::errors::SyncError;
use crate::core::sync::{LockOwner, RobustMutex, SyncConfig};
use crate::core::types::{IpcKey, Pid};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Shared region
///
/// The payload is only ever reached through `&T`; payloads keep their
/// mutable words in atomics so that single-word reads are sound without the
/// lock, while multi-word consistency comes from holding `lock()`.
pub struct SharedSegment<T> {
    key: IpcKey,
    owner_pid: Pid,
    lock: RobustMutex,
    data: T,
    removed: AtomicBool,
    attached: AtomicUsize,
    next_attachment: AtomicU64,
}

impl<T> SharedSegment<T> {
    pub(super) fn new(key: IpcKey, owner_pid: Pid, config: SyncConfig, data: T) -> Self {
        Self {
            key,
            owner_pid,
            lock: RobustMutex::new(config),
            data,
            removed: AtomicBool::new(false),
            attached: AtomicUsize::new(0),
            next_attachment: AtomicU64::new(1),
        }
    }

    pub fn key(&self) -> IpcKey {
        self.key
    }

    pub fn owner_pid(&self) -> Pid {
        self.owner_pid
    }

    pub fn lock(&self) -> &RobustMutex {
        &self.lock
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    /// True once the creator removed the region from its namespace
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::Acquire)
    }

    pub(super) fn register_attachment(&self, pid: Pid) -> LockOwner {
        self.attached.fetch_add(1, Ordering::AcqRel);
        let id = self.next_attachment.fetch_add(1, Ordering::Relaxed);
        LockOwner::new(pid, id)
    }

    pub(super) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }

    /// Drop one attachment
    ///
    /// A detaching owner that still holds the lock has left mid-critical
    /// section and the lock is abandoned.
    pub fn detach(&self, owner: LockOwner) {
        self.lock.abandon(owner);
        let _ = self
            .attached
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Run `f` on the payload inside one lock/unlock bracket
    pub fn with_locked<R>(&self, owner: LockOwner, f: impl FnOnce(&T) -> R) -> Result<R, SyncError> {
        self.lock.lock(owner)?;
        let result = f(&self.data);
        self.lock.unlock(owner)?;
        Ok(result)
    }
}

impl<T> std::fmt::Debug for SharedSegment<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("key", &format_args!("0x{:08x}", self.key))
            .field("owner_pid", &self.owner_pid)
            .field("lock", &self.lock)
            .field("attached", &self.attached())
            .field("removed", &self.is_removed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_attachments_are_distinct() {
        let seg = SharedSegment::new(7, 1, SyncConfig::strict(), AtomicU32::new(0));
        let a = seg.register_attachment(1);
        let b = seg.register_attachment(1);
        assert_ne!(a, b);
        assert_eq!(seg.attached(), 2);

        seg.detach(a);
        seg.detach(b);
        seg.detach(b);
        assert_eq!(seg.attached(), 0);
    }

    #[test]
    fn test_with_locked_releases() {
        let seg = SharedSegment::new(7, 1, SyncConfig::strict(), AtomicU32::new(0));
        let owner = seg.register_attachment(1);

        let value = seg
            .with_locked(owner, |v| {
                v.fetch_add(5, Ordering::Relaxed);
                v.load(Ordering::Relaxed)
            })
            .unwrap();
        assert_eq!(value, 5);
        assert!(!seg.lock().is_held_by(owner));
    }

    #[test]
    fn test_detach_while_holding_abandons() {
        let seg = SharedSegment::new(7, 1, SyncConfig::strict(), ());
        let holder = seg.register_attachment(10);
        let other = seg.register_attachment(11);

        seg.lock().lock(holder).unwrap();
        seg.detach(holder);

        assert_eq!(
            seg.lock().lock(other),
            Err(SyncError::OwnerDied { pid: 10 })
        );
    }
}
