/*!
 * Shared Memory Traits
 * Type-erased control surface over regions of any payload
 */

use super::segment::SharedSegment;
use crate::core::types::Pid;
use std::any::Any;
use std::sync::Arc;

/// Operations the namespace needs without knowing a region's payload type
pub trait SharedRegion: Send + Sync {
    /// Payload type name, used in diagnostics
    fn kind(&self) -> &'static str;

    fn owner_pid(&self) -> Pid;

    fn attached(&self) -> usize;

    fn mark_removed(&self);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Send + Sync + 'static> SharedRegion for SharedSegment<T> {
    fn kind(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn owner_pid(&self) -> Pid {
        SharedSegment::owner_pid(self)
    }

    fn attached(&self) -> usize {
        SharedSegment::attached(self)
    }

    fn mark_removed(&self) {
        SharedSegment::mark_removed(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
