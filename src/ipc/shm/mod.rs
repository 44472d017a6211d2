/*!
 * Shared Memory Module
 * Named regions shared between the supervisor and its workers
 */

pub mod manager;
pub mod segment;
pub mod traits;
pub mod types;

// Re-export public API
pub use manager::ShmNamespace;
pub use segment::SharedSegment;
pub use traits::SharedRegion;
pub use types::{ShmError, ShmStats};
