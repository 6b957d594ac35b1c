/*!
 * Monitoring
 * Tracing setup and retry queue metrics
 */

mod metrics;
mod tracer;

pub(crate) use metrics::RetryCounters;
pub use metrics::RetryStats;
pub use tracer::{init_tracing, TRACE_JSON_ENV};
