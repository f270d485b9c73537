//! Stateless QID worker.
//!
//! Receives messages from the shared subscription, dispatches them to the
//! job-run or resource-check handler, executes runner commands and
//! records per-step progress back through the control-plane service. Any
//! number of workers compete for messages on the same subscription.

mod check;
pub mod executor;
mod job_run;
mod params;
mod worker;

pub use worker::Worker;
