/*!
 * Core Types
 * Common types used across the simulator
 */

/// Simulated process ID
pub type Pid = u32;

/// Worker slot index, `0..max_workers`
///
/// Slots are recycled once the supervisor reaps the worker that held them.
pub type WorkerId = usize;

/// Resource class index, `0..class_count`
pub type ClassId = usize;

/// Count of resource instances
pub type Instances = u32;

/// Key naming a shared region inside a namespace
pub type IpcKey = u32;

/// Request ticket issued by the resource arbiter
pub type Ticket = u64;
