/*!
 * Core Module
 * Fundamental simulator types, limits, errors and synchronization
 */

pub mod context;
pub mod errors;
pub mod limits;
pub mod sync;
pub mod types;

// Re-export for convenience
pub use context::SimContext;
pub use errors::*;
pub use types::*;
