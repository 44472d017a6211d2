/*!
 * System Limits and Constants
 *
 * Centralized location for simulator-wide limits, defaults and magic numbers.
 * Organized by domain for maintainability and discoverability.
 */

use std::time::Duration;

// =============================================================================
// VIRTUAL TIME
// =============================================================================

/// Nanoseconds in one virtual second
pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Nanoseconds in one virtual millisecond
pub const NANOS_PER_MILLI: u64 = 1_000_000;

/// Upper bound (exclusive) of one clock advance per supervisor tick
pub const DEFAULT_MAX_TICK_ADVANCE_NANOS: u64 = NANOS_PER_SECOND;

/// Upper bound (exclusive) of the virtual gap between two spawns (500ms)
pub const DEFAULT_SPAWN_INTERVAL_NANOS: u64 = 500 * NANOS_PER_MILLI;

/// Real time the supervisor sleeps between ticks
pub const DEFAULT_TICK_SLEEP: Duration = Duration::from_millis(100);

/// Virtual interval between deadlock detection passes
pub const DEFAULT_DEADLOCK_CHECK_NANOS: u64 = NANOS_PER_SECOND;

// =============================================================================
// PROCESS LIMITS
// =============================================================================

/// Maximum number of concurrently live workers
pub const MAX_WORKERS: usize = 18;

/// First PID handed to a simulated worker
pub const FIRST_WORKER_PID: u32 = 1000;

/// PID of the supervisor itself
pub const SUPERVISOR_PID: u32 = 1;

// =============================================================================
// RESOURCE LIMITS
// =============================================================================

/// Number of resource classes in the table
pub const DEFAULT_RESOURCE_CLASSES: usize = 20;

/// Smallest instance count of a resource class
pub const MIN_CLASS_INSTANCES: u32 = 1;

/// Largest instance count of a resource class
pub const MAX_CLASS_INSTANCES: u32 = 10;

// =============================================================================
// SHARED REGIONS
// =============================================================================

/// Default key of the clock register
pub const CLOCK_KEY: u32 = 0x4F53_5301;

/// Default key of the resource table
pub const RESOURCE_TABLE_KEY: u32 = 0x4F53_5302;

/// Maximum regions a namespace will hold
pub const MAX_SHARED_REGIONS: usize = 64;

// =============================================================================
// SYNCHRONIZATION
// =============================================================================

/// Default bound on a single lock acquisition
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// How often a blocked locker re-checks the holder's liveness
pub const DEFAULT_LIVENESS_POLL: Duration = Duration::from_millis(10);

// =============================================================================
// WORKER WORKLOAD
// =============================================================================

/// Upper bound (exclusive) of the virtual gap between two worker actions (250ms)
pub const DEFAULT_ACTION_INTERVAL_NANOS: u64 = 250 * NANOS_PER_MILLI;

/// Virtual interval between termination checks (250ms)
pub const DEFAULT_TERMINATION_CHECK_NANOS: u64 = 250 * NANOS_PER_MILLI;

/// Real time a worker waits for a queued request before giving up
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Real time a worker sleeps between polls of the clock
pub const DEFAULT_WORKER_POLL: Duration = Duration::from_millis(5);
