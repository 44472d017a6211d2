/*!
 * Monitoring
 * Tracing subscriber setup and span helpers
 */

mod tracer;

pub use tracer::{init_tracing, worker_span, TracingOptions};
