/*!
 * Virtual Clock
 * Handle onto the shared time register
 */

use super::register::ClockRegister;
use super::types::{ClockError, ClockLayout, ClockResult, ClockRole, SimTime};
use crate::core::context::SimContext;
use crate::core::sync::LockOwner;
use crate::core::types::{IpcKey, Pid};
use crate::ipc::shm::{SharedSegment, ShmNamespace};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One participant's handle onto the shared clock
///
/// `lock()`/`unlock()` are explicit so a holder can read both fields, and the
/// writer can advance them, inside one bracket. Dropping a handle without
/// `destroy()` while it holds the lock is treated as the participant dying
/// mid-critical-section: the lock is abandoned and other lockers get
/// `SyncError::OwnerDied`.
pub struct VirtualClock {
    role: ClockRole,
    pid: Pid,
    key: IpcKey,
    owner: LockOwner,
    namespace: Arc<ShmNamespace>,
    segment: Option<Arc<SharedSegment<ClockRegister>>>,
}

impl VirtualClock {
    /// Create (writer) or attach to (reader) the clock register of `ctx`
    #[instrument(skip(ctx), fields(key = ctx.clock_key))]
    pub fn create(ctx: &SimContext, role: ClockRole, pid: Pid) -> ClockResult<Self> {
        let (segment, owner) = match role {
            ClockRole::Writer => {
                ctx.namespace
                    .create(ctx.clock_key, pid, ctx.sync, ClockRegister::zero())?
            }
            ClockRole::Reader => ctx.namespace.attach::<ClockRegister>(ctx.clock_key, pid)?,
        };

        debug!(?role, pid, "Clock handle ready");
        Ok(Self {
            role,
            pid,
            key: ctx.clock_key,
            owner,
            namespace: ctx.namespace.clone(),
            segment: Some(segment),
        })
    }

    pub fn role(&self) -> ClockRole {
        self.role
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn segment(&self) -> ClockResult<&SharedSegment<ClockRegister>> {
        self.segment.as_deref().ok_or(ClockError::Destroyed)
    }

    /// Acquire exclusive access, blocking until available
    pub fn lock(&self) -> ClockResult<()> {
        self.segment()?.lock().lock(self.owner)?;
        Ok(())
    }

    /// Release exclusive access taken by `lock()`
    ///
    /// Calling this without holding the lock is a caller error and is
    /// reported as `SyncError::NotHeld`.
    pub fn unlock(&self) -> ClockResult<()> {
        self.segment()?.lock().unlock(self.owner)?;
        Ok(())
    }

    /// True while this handle holds the lock
    pub fn is_locked(&self) -> bool {
        self.segment
            .as_ref()
            .is_some_and(|s| s.lock().is_held_by(self.owner))
    }

    fn require_lock(&self) -> ClockResult<&SharedSegment<ClockRegister>> {
        let segment = self.segment()?;
        if !segment.lock().is_held_by(self.owner) {
            return Err(ClockError::NotLocked { pid: self.pid });
        }
        Ok(segment)
    }

    /// Add `delta_nanos` to the current time; writer only, lock held
    pub fn advance(&self, delta_nanos: u64) -> ClockResult<SimTime> {
        if self.role != ClockRole::Writer {
            return Err(ClockError::ReadOnly { pid: self.pid });
        }
        let segment = self.require_lock()?;
        Ok(segment.data().advance(delta_nanos))
    }

    /// Whole seconds; needs the lock only for consistency with `read_nanos`
    pub fn read_seconds(&self) -> ClockResult<u64> {
        Ok(self.segment()?.data().seconds())
    }

    /// Sub-second remainder; needs the lock only for consistency with `read_seconds`
    pub fn read_nanos(&self) -> ClockResult<u32> {
        Ok(self.segment()?.data().nanos())
    }

    /// Both fields, consistent; the caller must hold the lock
    pub fn snapshot(&self) -> ClockResult<SimTime> {
        Ok(self.require_lock()?.data().load())
    }

    /// Binary layout of the register; the caller must hold the lock
    pub fn layout(&self) -> ClockResult<ClockLayout> {
        Ok(self.require_lock()?.data().layout())
    }

    /// Consistent current time in one lock/unlock bracket
    pub fn now(&self) -> ClockResult<SimTime> {
        let segment = self.segment()?;
        Ok(segment.with_locked(self.owner, |register| register.load())?)
    }

    /// Release the shared region; safe to call repeatedly
    ///
    /// A held lock is released first. The writer also removes the register
    /// from the namespace, so later readers can no longer attach.
    #[instrument(skip(self), fields(pid = self.pid, role = ?self.role))]
    pub fn destroy(&mut self) -> ClockResult<()> {
        let Some(segment) = self.segment.take() else {
            return Ok(());
        };

        if segment.lock().is_held_by(self.owner) {
            segment.lock().unlock(self.owner)?;
        }
        self.release(&segment);
        info!(final_time = %segment.data().load(), "Clock handle destroyed");
        Ok(())
    }

    fn release(&self, segment: &SharedSegment<ClockRegister>) {
        segment.detach(self.owner);
        if self.role == ClockRole::Writer {
            if let Err(e) = self.namespace.remove(self.key, self.pid) {
                warn!(error = %e, "Clock register already gone");
            }
        }
    }
}

impl Drop for VirtualClock {
    fn drop(&mut self) {
        if let Some(segment) = self.segment.take() {
            // detach() abandons the lock if we are still inside a bracket
            self.release(&segment);
        }
    }
}

impl std::fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualClock")
            .field("role", &self.role)
            .field("pid", &self.pid)
            .field("destroyed", &self.segment.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::SyncError;
    use crate::core::sync::SyncConfig;
    use crate::resources::TableSpec;

    fn ctx() -> SimContext {
        SimContext::new(TableSpec::uniform(1, 1, 1)).with_sync(SyncConfig::strict())
    }

    #[test]
    fn test_writer_starts_at_zero() {
        let ctx = ctx();
        let clock = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();
        assert_eq!(clock.now().unwrap(), SimTime::ZERO);
    }

    #[test]
    fn test_reader_without_writer_fails() {
        let err = VirtualClock::create(&ctx(), ClockRole::Reader, 2).unwrap_err();
        assert!(matches!(err, ClockError::ResourceUnavailable(_)));
    }

    #[test]
    fn test_second_writer_fails() {
        let ctx = ctx();
        let _clock = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();
        let err = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap_err();
        assert!(matches!(err, ClockError::ResourceUnavailable(_)));
    }

    #[test]
    fn test_advance_requires_lock() {
        let ctx = ctx();
        let clock = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();
        assert_eq!(clock.advance(5), Err(ClockError::NotLocked { pid: 1 }));
        assert_eq!(clock.snapshot(), Err(ClockError::NotLocked { pid: 1 }));
    }

    #[test]
    fn test_reader_cannot_advance() {
        let ctx = ctx();
        let _writer = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();
        let reader = VirtualClock::create(&ctx, ClockRole::Reader, 2).unwrap();
        reader.lock().unwrap();
        assert_eq!(reader.advance(5), Err(ClockError::ReadOnly { pid: 2 }));
        reader.unlock().unwrap();
    }

    #[test]
    fn test_unlock_without_lock_is_reported() {
        let ctx = ctx();
        let clock = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();
        assert_eq!(
            clock.unlock(),
            Err(ClockError::Synchronization(SyncError::NotHeld { pid: 1 }))
        );
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let ctx = ctx();
        let mut clock = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();
        clock.lock().unwrap();
        clock.destroy().unwrap();
        clock.destroy().unwrap();

        assert!(!ctx.namespace.contains(ctx.clock_key));
        assert_eq!(clock.lock(), Err(ClockError::Destroyed));
        assert_eq!(clock.read_seconds(), Err(ClockError::Destroyed));
    }

    #[test]
    fn test_dropped_holder_poisons_lock() {
        let ctx = ctx();
        let writer = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();
        let reader = VirtualClock::create(&ctx, ClockRole::Reader, 2).unwrap();

        reader.lock().unwrap();
        drop(reader);

        assert_eq!(
            writer.lock(),
            Err(ClockError::Synchronization(SyncError::OwnerDied { pid: 2 }))
        );
    }
}
