/*!
 * Virtual Clock Module
 *
 * A shared, monotonically advancing time register: whole seconds plus a
 * nanosecond remainder kept below one second. One writer advances it, any
 * number of readers observe it, and a robust lock keeps the two fields
 * consistent across participants.
 */

mod register;
pub mod types;
mod virtual_clock;

pub use register::ClockRegister;
pub use types::{ClockError, ClockLayout, ClockResult, ClockRole, SimTime};
pub use virtual_clock::VirtualClock;
