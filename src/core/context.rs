/*!
 * Simulation Context
 * Everything a participant needs to find the shared regions of one run
 */

use crate::core::limits::{CLOCK_KEY, RESOURCE_TABLE_KEY};
use crate::core::sync::SyncConfig;
use crate::core::types::IpcKey;
use crate::ipc::shm::ShmNamespace;
use crate::resources::TableSpec;
use std::sync::Arc;

/// Explicit replacement for process-wide globals
///
/// The supervisor builds one context per run and hands clones to every
/// worker it launches, the way a child inherits IPC keys across `fork`.
#[derive(Debug, Clone)]
pub struct SimContext {
    pub namespace: Arc<ShmNamespace>,
    pub clock_key: IpcKey,
    pub resource_key: IpcKey,
    pub sync: SyncConfig,
    /// Sizing used when the resource table is created
    pub table: TableSpec,
}

impl SimContext {
    pub fn new(table: TableSpec) -> Self {
        Self {
            namespace: Arc::new(ShmNamespace::new()),
            clock_key: CLOCK_KEY,
            resource_key: RESOURCE_TABLE_KEY,
            sync: SyncConfig::default(),
            table,
        }
    }

    pub fn with_namespace(mut self, namespace: Arc<ShmNamespace>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_keys(mut self, clock_key: IpcKey, resource_key: IpcKey) -> Self {
        self.clock_key = clock_key;
        self.resource_key = resource_key;
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }
}
