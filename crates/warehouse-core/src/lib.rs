//! Warehouse Core Library
//!
//! Plumbing shared by the exploit scheduler and the submission dispatcher:
//! tracing initialisation, component/run spans with lifecycle events, and
//! retry-with-backoff for transient network failures.

pub mod obs;
pub mod retry;
pub mod telemetry;

pub use obs::{component_span, run_span};
pub use retry::{retry_with_backoff, RetryError, RetryPolicy};
pub use telemetry::init_tracing;
