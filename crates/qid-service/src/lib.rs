//! Control-plane service for QID.
//!
//! `Qid` implements the [`qid_core::Service`] contract over the
//! repository layer and the topic; `CheckScheduler` is the single
//! scheduled producer of resource-check messages.

pub mod scheduler;
pub mod service;

pub use scheduler::CheckScheduler;
pub use service::Qid;
